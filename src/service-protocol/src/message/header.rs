use restate_sdk_types::journal::EntryType;

const COMPLETED_MASK: u64 = 0x0001_0000_0000;
const REQUIRES_ACK_MASK: u64 = 0x8000_0000_0000;

type MessageTypeId = u16;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Core,
    IO,
    State,
    Syscall,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageType {
    Start,
    Completion,
    Suspension,
    End,
    Ack,
    InputEntry,
    OutputEntry,
    GetStateEntry,
    SetStateEntry,
    ClearStateEntry,
    ClearAllStateEntry,
    GetStateKeysEntry,
    SleepEntry,
    InvokeEntry,
    BackgroundInvokeEntry,
    AwakeableEntry,
    ResolveAwakeableEntry,
    RejectAwakeableEntry,
    SideEffectEntry,
}

impl MessageType {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageType::Start => MessageKind::Core,
            MessageType::Completion => MessageKind::Core,
            MessageType::Suspension => MessageKind::Core,
            MessageType::End => MessageKind::Core,
            MessageType::Ack => MessageKind::Core,
            MessageType::InputEntry => MessageKind::IO,
            MessageType::OutputEntry => MessageKind::IO,
            MessageType::GetStateEntry => MessageKind::State,
            MessageType::SetStateEntry => MessageKind::State,
            MessageType::ClearStateEntry => MessageKind::State,
            MessageType::ClearAllStateEntry => MessageKind::State,
            MessageType::GetStateKeysEntry => MessageKind::State,
            MessageType::SleepEntry => MessageKind::Syscall,
            MessageType::InvokeEntry => MessageKind::Syscall,
            MessageType::BackgroundInvokeEntry => MessageKind::Syscall,
            MessageType::AwakeableEntry => MessageKind::Syscall,
            MessageType::ResolveAwakeableEntry => MessageKind::Syscall,
            MessageType::RejectAwakeableEntry => MessageKind::Syscall,
            MessageType::SideEffectEntry => MessageKind::Syscall,
        }
    }

    fn has_completed_flag(&self) -> bool {
        matches!(
            self,
            MessageType::InputEntry
                | MessageType::GetStateEntry
                | MessageType::GetStateKeysEntry
                | MessageType::SleepEntry
                | MessageType::InvokeEntry
                | MessageType::AwakeableEntry
        )
    }

    fn has_requires_ack_flag(&self) -> bool {
        matches!(
            self.kind(),
            MessageKind::IO | MessageKind::State | MessageKind::Syscall
        )
    }
}

const START_MESSAGE_TYPE: u16 = 0x0000;
const COMPLETION_MESSAGE_TYPE: u16 = 0x0001;
const SUSPENSION_MESSAGE_TYPE: u16 = 0x0002;
const END_MESSAGE_TYPE: u16 = 0x0003;
const ACK_MESSAGE_TYPE: u16 = 0x0004;
const INPUT_ENTRY_MESSAGE_TYPE: u16 = 0x0400;
const OUTPUT_ENTRY_MESSAGE_TYPE: u16 = 0x0401;
const GET_STATE_ENTRY_MESSAGE_TYPE: u16 = 0x0800;
const SET_STATE_ENTRY_MESSAGE_TYPE: u16 = 0x0801;
const CLEAR_STATE_ENTRY_MESSAGE_TYPE: u16 = 0x0802;
const CLEAR_ALL_STATE_ENTRY_MESSAGE_TYPE: u16 = 0x0803;
const GET_STATE_KEYS_ENTRY_MESSAGE_TYPE: u16 = 0x0804;
const SLEEP_ENTRY_MESSAGE_TYPE: u16 = 0x0C00;
const INVOKE_ENTRY_MESSAGE_TYPE: u16 = 0x0C01;
const BACKGROUND_INVOKE_ENTRY_MESSAGE_TYPE: u16 = 0x0C02;
const AWAKEABLE_ENTRY_MESSAGE_TYPE: u16 = 0x0C03;
const RESOLVE_AWAKEABLE_ENTRY_MESSAGE_TYPE: u16 = 0x0C04;
const REJECT_AWAKEABLE_ENTRY_MESSAGE_TYPE: u16 = 0x0C05;
const SIDE_EFFECT_ENTRY_MESSAGE_TYPE: u16 = 0x0C06;

impl From<MessageType> for MessageTypeId {
    fn from(mt: MessageType) -> Self {
        match mt {
            MessageType::Start => START_MESSAGE_TYPE,
            MessageType::Completion => COMPLETION_MESSAGE_TYPE,
            MessageType::Suspension => SUSPENSION_MESSAGE_TYPE,
            MessageType::End => END_MESSAGE_TYPE,
            MessageType::Ack => ACK_MESSAGE_TYPE,
            MessageType::InputEntry => INPUT_ENTRY_MESSAGE_TYPE,
            MessageType::OutputEntry => OUTPUT_ENTRY_MESSAGE_TYPE,
            MessageType::GetStateEntry => GET_STATE_ENTRY_MESSAGE_TYPE,
            MessageType::SetStateEntry => SET_STATE_ENTRY_MESSAGE_TYPE,
            MessageType::ClearStateEntry => CLEAR_STATE_ENTRY_MESSAGE_TYPE,
            MessageType::ClearAllStateEntry => CLEAR_ALL_STATE_ENTRY_MESSAGE_TYPE,
            MessageType::GetStateKeysEntry => GET_STATE_KEYS_ENTRY_MESSAGE_TYPE,
            MessageType::SleepEntry => SLEEP_ENTRY_MESSAGE_TYPE,
            MessageType::InvokeEntry => INVOKE_ENTRY_MESSAGE_TYPE,
            MessageType::BackgroundInvokeEntry => BACKGROUND_INVOKE_ENTRY_MESSAGE_TYPE,
            MessageType::AwakeableEntry => AWAKEABLE_ENTRY_MESSAGE_TYPE,
            MessageType::ResolveAwakeableEntry => RESOLVE_AWAKEABLE_ENTRY_MESSAGE_TYPE,
            MessageType::RejectAwakeableEntry => REJECT_AWAKEABLE_ENTRY_MESSAGE_TYPE,
            MessageType::SideEffectEntry => SIDE_EFFECT_ENTRY_MESSAGE_TYPE,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown message code {0:#x}")]
pub struct UnknownMessageType(u16);

impl TryFrom<MessageTypeId> for MessageType {
    type Error = UnknownMessageType;

    fn try_from(value: MessageTypeId) -> Result<Self, UnknownMessageType> {
        match value {
            START_MESSAGE_TYPE => Ok(MessageType::Start),
            COMPLETION_MESSAGE_TYPE => Ok(MessageType::Completion),
            SUSPENSION_MESSAGE_TYPE => Ok(MessageType::Suspension),
            END_MESSAGE_TYPE => Ok(MessageType::End),
            ACK_MESSAGE_TYPE => Ok(MessageType::Ack),
            INPUT_ENTRY_MESSAGE_TYPE => Ok(MessageType::InputEntry),
            OUTPUT_ENTRY_MESSAGE_TYPE => Ok(MessageType::OutputEntry),
            GET_STATE_ENTRY_MESSAGE_TYPE => Ok(MessageType::GetStateEntry),
            SET_STATE_ENTRY_MESSAGE_TYPE => Ok(MessageType::SetStateEntry),
            CLEAR_STATE_ENTRY_MESSAGE_TYPE => Ok(MessageType::ClearStateEntry),
            CLEAR_ALL_STATE_ENTRY_MESSAGE_TYPE => Ok(MessageType::ClearAllStateEntry),
            GET_STATE_KEYS_ENTRY_MESSAGE_TYPE => Ok(MessageType::GetStateKeysEntry),
            SLEEP_ENTRY_MESSAGE_TYPE => Ok(MessageType::SleepEntry),
            INVOKE_ENTRY_MESSAGE_TYPE => Ok(MessageType::InvokeEntry),
            BACKGROUND_INVOKE_ENTRY_MESSAGE_TYPE => Ok(MessageType::BackgroundInvokeEntry),
            AWAKEABLE_ENTRY_MESSAGE_TYPE => Ok(MessageType::AwakeableEntry),
            RESOLVE_AWAKEABLE_ENTRY_MESSAGE_TYPE => Ok(MessageType::ResolveAwakeableEntry),
            REJECT_AWAKEABLE_ENTRY_MESSAGE_TYPE => Ok(MessageType::RejectAwakeableEntry),
            SIDE_EFFECT_ENTRY_MESSAGE_TYPE => Ok(MessageType::SideEffectEntry),
            v => Err(UnknownMessageType(v)),
        }
    }
}

impl TryFrom<MessageType> for EntryType {
    type Error = MessageType;

    fn try_from(value: MessageType) -> Result<Self, Self::Error> {
        match value {
            MessageType::InputEntry => Ok(EntryType::Input),
            MessageType::OutputEntry => Ok(EntryType::Output),
            MessageType::GetStateEntry => Ok(EntryType::GetState),
            MessageType::SetStateEntry => Ok(EntryType::SetState),
            MessageType::ClearStateEntry => Ok(EntryType::ClearState),
            MessageType::ClearAllStateEntry => Ok(EntryType::ClearAllState),
            MessageType::GetStateKeysEntry => Ok(EntryType::GetStateKeys),
            MessageType::SleepEntry => Ok(EntryType::Sleep),
            MessageType::InvokeEntry => Ok(EntryType::Invoke),
            MessageType::BackgroundInvokeEntry => Ok(EntryType::BackgroundInvoke),
            MessageType::AwakeableEntry => Ok(EntryType::Awakeable),
            MessageType::ResolveAwakeableEntry => Ok(EntryType::ResolveAwakeable),
            MessageType::RejectAwakeableEntry => Ok(EntryType::RejectAwakeable),
            MessageType::SideEffectEntry => Ok(EntryType::SideEffect),
            MessageType::Start
            | MessageType::Completion
            | MessageType::Suspension
            | MessageType::End
            | MessageType::Ack => Err(value),
        }
    }
}

impl From<EntryType> for MessageType {
    fn from(et: EntryType) -> Self {
        match et {
            EntryType::Input => MessageType::InputEntry,
            EntryType::Output => MessageType::OutputEntry,
            EntryType::GetState => MessageType::GetStateEntry,
            EntryType::SetState => MessageType::SetStateEntry,
            EntryType::ClearState => MessageType::ClearStateEntry,
            EntryType::ClearAllState => MessageType::ClearAllStateEntry,
            EntryType::GetStateKeys => MessageType::GetStateKeysEntry,
            EntryType::Sleep => MessageType::SleepEntry,
            EntryType::Invoke => MessageType::InvokeEntry,
            EntryType::BackgroundInvoke => MessageType::BackgroundInvokeEntry,
            EntryType::Awakeable => MessageType::AwakeableEntry,
            EntryType::ResolveAwakeable => MessageType::ResolveAwakeableEntry,
            EntryType::RejectAwakeable => MessageType::RejectAwakeableEntry,
            EntryType::SideEffect => MessageType::SideEffectEntry,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    ty: MessageType,
    length: u32,

    // --- Flags
    /// Only completable entries have the completed flag. See [`MessageType::has_completed_flag`].
    completed_flag: Option<bool>,
    /// All entry messages may have the requires ack flag.
    requires_ack_flag: Option<bool>,
}

impl MessageHeader {
    #[inline]
    pub fn new(ty: MessageType, length: u32) -> Self {
        Self::_new(ty, None, None, length)
    }

    #[inline]
    pub(super) fn new_entry_header(
        ty: MessageType,
        completed_flag: Option<bool>,
        requires_ack_flag: Option<bool>,
        length: u32,
    ) -> Self {
        debug_assert!(completed_flag.is_some() == ty.has_completed_flag());
        debug_assert!(ty.has_requires_ack_flag());

        MessageHeader {
            ty,
            length,
            completed_flag,
            requires_ack_flag: Some(requires_ack_flag.unwrap_or(false)),
        }
    }

    #[inline]
    fn _new(
        ty: MessageType,
        completed_flag: Option<bool>,
        requires_ack_flag: Option<bool>,
        length: u32,
    ) -> Self {
        MessageHeader {
            ty,
            length,
            completed_flag,
            requires_ack_flag,
        }
    }

    #[inline]
    pub fn message_kind(&self) -> MessageKind {
        self.ty.kind()
    }

    #[inline]
    pub fn message_type(&self) -> MessageType {
        self.ty
    }

    #[inline]
    pub fn completed(&self) -> Option<bool> {
        self.completed_flag
    }

    #[inline]
    pub fn requires_ack(&self) -> Option<bool> {
        self.requires_ack_flag
    }

    #[inline]
    pub fn frame_length(&self) -> u32 {
        self.length
    }
}

macro_rules! read_flag_if {
    ($cond:expr, $value:expr, $mask:expr) => {
        if $cond {
            Some(($value & $mask) != 0)
        } else {
            None
        }
    };
}

impl TryFrom<u64> for MessageHeader {
    type Error = UnknownMessageType;

    /// Deserialize the protocol header.
    fn try_from(value: u64) -> Result<Self, Self::Error> {
        let ty_code = (value >> 48) as u16;
        let ty: MessageType = ty_code.try_into()?;

        let completed_flag = read_flag_if!(ty.has_completed_flag(), value, COMPLETED_MASK);
        let requires_ack_flag = read_flag_if!(ty.has_requires_ack_flag(), value, REQUIRES_ACK_MASK);
        let length = value as u32;

        Ok(MessageHeader::_new(
            ty,
            completed_flag,
            requires_ack_flag,
            length,
        ))
    }
}

macro_rules! write_flag {
    ($flag:expr, $value:expr, $mask:expr) => {
        if let Some(true) = $flag {
            *$value |= $mask;
        }
    };
}

impl From<MessageHeader> for u64 {
    /// Serialize the protocol header.
    fn from(message_header: MessageHeader) -> Self {
        let mut res =
            ((u16::from(message_header.ty) as u64) << 48) | (message_header.length as u64);

        write_flag!(message_header.completed_flag, &mut res, COMPLETED_MASK);
        write_flag!(
            message_header.requires_ack_flag,
            &mut res,
            REQUIRES_ACK_MASK
        );

        res
    }
}

#[cfg(test)]
mod tests {

    use super::{MessageKind::*, MessageType::*, *};

    impl MessageHeader {
        fn new_completable_entry(ty: MessageType, completed: bool, length: u32) -> Self {
            Self::new_entry_header(ty, Some(completed), None, length)
        }
    }

    macro_rules! roundtrip_test {
        ($test_name:ident, $header:expr, $ty:expr, $kind:expr, $len:expr) => {
            roundtrip_test!($test_name, $header, $ty, $kind, $len, None, None);
        };
        ($test_name:ident, $header:expr, $ty:expr, $kind:expr, $len:expr, completed: $completed:expr) => {
            roundtrip_test!($test_name, $header, $ty, $kind, $len, Some($completed), None);
        };
        ($test_name:ident, $header:expr, $ty:expr, $kind:expr, $len:expr, requires_ack: $requires_ack:expr) => {
            roundtrip_test!($test_name, $header, $ty, $kind, $len, None, Some($requires_ack));
        };
        ($test_name:ident, $header:expr, $ty:expr, $kind:expr, $len:expr, requires_ack: $requires_ack:expr, completed: $completed:expr) => {
            roundtrip_test!(
                $test_name,
                $header,
                $ty,
                $kind,
                $len,
                Some($completed),
                Some($requires_ack)
            );
        };
        ($test_name:ident, $header:expr, $ty:expr, $kind:expr, $len:expr, $completed:expr, $requires_ack:expr) => {
            #[test]
            fn $test_name() {
                let serialized: u64 = $header.into();
                let header: MessageHeader = serialized.try_into().unwrap();

                assert_eq!(header.message_type(), $ty);
                assert_eq!(header.message_kind(), $kind);
                assert_eq!(header.completed(), $completed);
                assert_eq!(header.requires_ack(), $requires_ack);
                assert_eq!(header.frame_length(), $len);
            }
        };
    }

    roundtrip_test!(start, MessageHeader::new(Start, 25), Start, Core, 25);

    roundtrip_test!(
        completion,
        MessageHeader::new(Completion, 22),
        Completion,
        Core,
        22
    );

    roundtrip_test!(end, MessageHeader::new(End, 0), End, Core, 0);

    roundtrip_test!(
        completed_get_state,
        MessageHeader::new_completable_entry(GetStateEntry, true, 0),
        GetStateEntry,
        State,
        0,
        requires_ack: false,
        completed: true
    );

    roundtrip_test!(
        not_completed_get_state,
        MessageHeader::new_completable_entry(GetStateEntry, false, 0),
        GetStateEntry,
        State,
        0,
        requires_ack: false,
        completed: false
    );

    roundtrip_test!(
        completed_get_state_with_len,
        MessageHeader::new_completable_entry(GetStateEntry, true, 10341),
        GetStateEntry,
        State,
        10341,
        requires_ack: false,
        completed: true
    );

    roundtrip_test!(
        side_effect_with_requires_ack,
        MessageHeader::new_entry_header(SideEffectEntry, None, Some(true), 10341),
        SideEffectEntry,
        Syscall,
        10341,
        requires_ack: true
    );

    #[test]
    fn unknown_message_type_is_rejected() {
        let serialized: u64 = 0xABCD_0000_0000_0000;
        assert!(MessageHeader::try_from(serialized).is_err());
    }
}
