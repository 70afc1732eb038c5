use core::fmt::{self, Display, Formatter};

#[repr(u16)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Debug)]
pub enum Status {
    HelpMessage = 214,
    ServiceReady = 220,
    GoodBye = 221,
    Ok = 250,
    CannotVerify = 252,
    StartMailInput = 354,
    Unavailable = 421,
    MailboxBusy = 450,
    ActionUnavailable = 451,
    InsufficientStorage = 452,
    SyntaxError = 500,
    ParameterError = 501,
    NotImplemented = 502,
    InvalidCommandSequence = 503,
    Error = 550,
    ExceededStorage = 552,
    MailboxNameNotAllowed = 553,
    TransactionFailed = 554,
    Unknown(u16),
}

impl Status {
    /// Checks if the status is a permanent rejection
    pub fn is_permanent(self) -> bool {
        u16::from(self) >= 500
    }

    /// Checks if the status is a temporary rejection
    pub fn is_temporary(self) -> bool {
        (400..500).contains(&u16::from(self))
    }

    pub fn is_success(self) -> bool {
        (200..400).contains(&u16::from(self))
    }
}

impl From<u16> for Status {
    fn from(value: u16) -> Self {
        match value {
            214 => Self::HelpMessage,
            220 => Self::ServiceReady,
            221 => Self::GoodBye,
            250 => Self::Ok,
            252 => Self::CannotVerify,
            354 => Self::StartMailInput,
            421 => Self::Unavailable,
            450 => Self::MailboxBusy,
            451 => Self::ActionUnavailable,
            452 => Self::InsufficientStorage,
            500 => Self::SyntaxError,
            501 => Self::ParameterError,
            502 => Self::NotImplemented,
            503 => Self::InvalidCommandSequence,
            550 => Self::Error,
            552 => Self::ExceededStorage,
            553 => Self::MailboxNameNotAllowed,
            554 => Self::TransactionFailed,
            _ => Self::Unknown(value),
        }
    }
}

impl From<Status> for u16 {
    fn from(value: Status) -> Self {
        match value {
            Status::HelpMessage => 214,
            Status::ServiceReady => 220,
            Status::GoodBye => 221,
            Status::Ok => 250,
            Status::CannotVerify => 252,
            Status::StartMailInput => 354,
            Status::Unavailable => 421,
            Status::MailboxBusy => 450,
            Status::ActionUnavailable => 451,
            Status::InsufficientStorage => 452,
            Status::SyntaxError => 500,
            Status::ParameterError => 501,
            Status::NotImplemented => 502,
            Status::InvalidCommandSequence => 503,
            Status::Error => 550,
            Status::ExceededStorage => 552,
            Status::MailboxNameNotAllowed => 553,
            Status::TransactionFailed => 554,
            Status::Unknown(v) => v,
        }
    }
}

impl Display for Status {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(fmt, "{}", u16::from(*self))
    }
}

/// An RFC 3463 enhanced status code, e.g. `5.1.1`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct EnhancedCode(pub u8, pub u16, pub u16);

impl EnhancedCode {
    pub const OK: Self = Self(2, 0, 0);
    pub const OTHER_ADDRESS: Self = Self(2, 1, 0);
    pub const BAD_DESTINATION: Self = Self(5, 1, 1);
    pub const BAD_DESTINATION_SYNTAX: Self = Self(5, 1, 3);
    pub const TEMPORARY_DESTINATION: Self = Self(4, 1, 1);
    pub const MESSAGE_TOO_BIG: Self = Self(5, 3, 4);
    pub const SYSTEM_NOT_ACCEPTING: Self = Self(4, 3, 2);
    pub const TEMPORARY_SYSTEM: Self = Self(4, 3, 0);
    pub const TEMPORARY_NETWORK: Self = Self(4, 4, 0);
    pub const TIMEOUT: Self = Self(4, 4, 2);
    pub const INVALID_COMMAND: Self = Self(5, 5, 1);
    pub const SYNTAX_ERROR: Self = Self(5, 5, 2);
    pub const INVALID_ARGUMENTS: Self = Self(5, 5, 4);
    pub const TEMPORARY_PROTOCOL: Self = Self(4, 5, 0);
    pub const AUTH_UNSUPPORTED: Self = Self(5, 7, 0);

    /// Parses the leading `class.subject.detail` token of a reply line.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let token = text.split_whitespace().next()?;
        let mut parts = token.splitn(3, '.');
        let class = parts.next()?.parse::<u8>().ok()?;
        let subject = parts.next()?.parse::<u16>().ok()?;
        let detail = parts.next()?.parse::<u16>().ok()?;

        matches!(class, 2 | 4 | 5).then_some(Self(class, subject, detail))
    }
}

impl Display for EnhancedCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0, self.1, self.2)
    }
}

/// A single protocol reply: the basic status, an optional enhanced code and
/// human readable text.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Reply {
    pub status: Status,
    pub enhanced: Option<EnhancedCode>,
    pub message: String,
}

impl Reply {
    #[must_use]
    pub fn new(status: Status, enhanced: EnhancedCode, message: impl Into<String>) -> Self {
        Self {
            status,
            enhanced: Some(enhanced),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(Status::Ok, EnhancedCode::OK, message)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

impl Display for Reply {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.enhanced {
            Some(enhanced) => write!(f, "{} {enhanced} {}", self.status, self.message),
            None => write!(f, "{} {}", self.status, self.message),
        }
    }
}
