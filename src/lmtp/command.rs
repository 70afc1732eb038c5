use core::fmt::{self, Display, Formatter};

use mailparse::MailAddr;

/// ESMTP parameters from a `MAIL FROM` command (RFC 5321 Section 3.3).
///
/// Keys are normalised to uppercase, and the order the client sent them in
/// is kept so they can be forwarded as received.
#[derive(PartialEq, Eq, Debug, Clone, Default)]
pub struct MailParameters {
    params: Vec<(String, Option<String>)>,
}

impl MailParameters {
    #[must_use]
    pub const fn new() -> Self {
        Self { params: Vec::new() }
    }

    /// Parses parameter tokens in the form `KEY=VALUE` or `FLAG`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A parameter appears multiple times
    /// - SIZE parameter has an invalid value (non-numeric or zero)
    pub fn from_params_str(params_str: &str) -> Result<Self, String> {
        let mut params = Self::new();

        for token in params_str.split_whitespace() {
            let (key, value) = token
                .split_once('=')
                .map_or((token, None), |(key, value)| (key, Some(value)));

            if params.has(key) {
                return Err(format!(
                    "Duplicate parameter '{}' not allowed",
                    key.to_ascii_uppercase()
                ));
            }

            if key.eq_ignore_ascii_case("SIZE") {
                match value.map(str::parse::<usize>) {
                    Some(Ok(0)) => return Err(String::from("SIZE=0 is not allowed")),
                    Some(Ok(_)) => {}
                    _ => return Err(format!("Invalid SIZE value: {}", value.unwrap_or(""))),
                }
            }

            match value {
                Some(value) => params.insert(key, value),
                None => params.insert_flag(key),
            }
        }

        Ok(params)
    }

    /// Adds a parameter with a value.
    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.params
            .push((key.as_ref().to_ascii_uppercase(), Some(value.into())));
    }

    /// Adds a parameter without a value (flag).
    pub fn insert_flag(&mut self, key: impl AsRef<str>) {
        self.params.push((key.as_ref().to_ascii_uppercase(), None));
    }

    /// Gets a parameter value by key (case-insensitive).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))?
            .1
            .as_deref()
    }

    /// Checks if a parameter exists (case-insensitive).
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.params.iter().any(|(k, _)| k.eq_ignore_ascii_case(key))
    }

    /// Gets the SIZE parameter value, if present.
    #[must_use]
    pub fn size(&self) -> Option<usize> {
        self.get("SIZE")?.parse().ok()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }
}

impl Display for MailParameters {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (index, (key, value)) in self.iter().enumerate() {
            if index > 0 {
                f.write_str(" ")?;
            }

            match value {
                None => f.write_str(key)?,
                Some(value) => write!(f, "{key}={value}")?,
            }
        }

        Ok(())
    }
}

/// A command received from the inbound LMTP client.
#[derive(Eq, PartialEq, Debug)]
pub enum Command {
    Lhlo(String),
    /// `HELO` or `EHLO`, neither of which is valid in LMTP.
    Helo(String),
    /// An empty sender is the null reverse-path (`MAIL FROM:<>`).
    MailFrom(String, MailParameters),
    RcptTo(String, MailParameters),
    Data,
    Rset,
    Noop,
    Quit,
    Vrfy(String),
    Help,
    Auth(String),
    Invalid(String),
}

impl Command {
    /// The verb, as used in logs and error messages.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Lhlo(_) => "LHLO",
            Self::Helo(_) => "HELO",
            Self::MailFrom(..) => "MAIL",
            Self::RcptTo(..) => "RCPT",
            Self::Data => "DATA",
            Self::Rset => "RSET",
            Self::Noop => "NOOP",
            Self::Quit => "QUIT",
            Self::Vrfy(_) => "VRFY",
            Self::Help => "HELP",
            Self::Auth(_) => "AUTH",
            Self::Invalid(_) => "INVALID",
        }
    }
}

impl Display for Command {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lhlo(host) | Self::Helo(host) => write!(fmt, "{} {host}", self.verb()),
            Self::MailFrom(from, params) if params.is_empty() => write!(fmt, "MAIL FROM:<{from}>"),
            Self::MailFrom(from, params) => write!(fmt, "MAIL FROM:<{from}> {params}"),
            Self::RcptTo(to, params) if params.is_empty() => write!(fmt, "RCPT TO:<{to}>"),
            Self::RcptTo(to, params) => write!(fmt, "RCPT TO:<{to}> {params}"),
            Self::Vrfy(arg) => write!(fmt, "VRFY {arg}"),
            // Credentials are never logged.
            Self::Auth(_) => fmt.write_str("AUTH"),
            Self::Invalid(command) => fmt.write_str(command),
            Self::Data | Self::Rset | Self::Noop | Self::Quit | Self::Help => {
                fmt.write_str(self.verb())
            }
        }
    }
}

/// Split `<addr> [params]` and parse both halves.
fn parse_path(rest: &str, allow_null: bool) -> Result<(String, MailParameters), String> {
    let rest = rest.trim();
    let (path, params) = rest
        .split_once(char::is_whitespace)
        .map_or((rest, ""), |(path, params)| (path, params));

    let params = MailParameters::from_params_str(params)?;

    if path == "<>" {
        return if allow_null {
            Ok((String::new(), params))
        } else {
            Err(String::from("Null path is not allowed here"))
        };
    }

    let parsed = mailparse::addrparse(path).map_err(|err| err.to_string())?;
    match parsed.first() {
        Some(MailAddr::Single(info)) => Ok((info.addr.clone(), params)),
        Some(MailAddr::Group(_)) => Err(format!("Group addresses are not allowed: {path}")),
        None => Err(format!("Expected an address in '{path}'")),
    }
}

/// `text` after `prefix`, compared ASCII case-insensitively. `None` if the
/// prefix doesn't match or would split a character.
fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    text.get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .map(|_| &text[prefix.len()..])
}

impl TryFrom<&str> for Command {
    type Error = Self;

    fn try_from(command: &str) -> Result<Self, Self::Error> {
        let trimmed = command.trim();
        let (verb, argument) = trimmed
            .split_once(' ')
            .map_or((trimmed, ""), |(verb, argument)| (verb, argument.trim()));

        if let Some(path) = strip_prefix_ignore_case(trimmed, "MAIL FROM:") {
            parse_path(path, true)
                .map(|(from, params)| Self::MailFrom(from, params))
                .map_err(Self::Invalid)
        } else if let Some(path) = strip_prefix_ignore_case(trimmed, "RCPT TO:") {
            parse_path(path, false)
                .map(|(to, params)| Self::RcptTo(to, params))
                .map_err(Self::Invalid)
        } else if verb.eq_ignore_ascii_case("LHLO") {
            if argument.is_empty() {
                Err(Self::Invalid(format!("Expected hostname in {trimmed}")))
            } else {
                Ok(Self::Lhlo(argument.to_string()))
            }
        } else if verb.eq_ignore_ascii_case("HELO") || verb.eq_ignore_ascii_case("EHLO") {
            Ok(Self::Helo(argument.to_string()))
        } else if verb.eq_ignore_ascii_case("VRFY") {
            Ok(Self::Vrfy(argument.to_string()))
        } else if verb.eq_ignore_ascii_case("AUTH") {
            Ok(Self::Auth(argument.to_string()))
        } else if verb.eq_ignore_ascii_case("HELP") {
            Ok(Self::Help)
        } else if verb.eq_ignore_ascii_case("NOOP") {
            Ok(Self::Noop)
        } else if trimmed.eq_ignore_ascii_case("DATA") {
            Ok(Self::Data)
        } else if trimmed.eq_ignore_ascii_case("RSET") {
            Ok(Self::Rset)
        } else if trimmed.eq_ignore_ascii_case("QUIT") {
            Ok(Self::Quit)
        } else {
            Err(Self::Invalid(trimmed.to_owned()))
        }
    }
}

impl TryFrom<&[u8]> for Command {
    type Error = Self;

    fn try_from(command: &[u8]) -> Result<Self, Self::Error> {
        std::str::from_utf8(command).map_or_else(
            |_| Err(Self::Invalid("Unable to interpret command".to_string())),
            Self::try_from,
        )
    }
}
