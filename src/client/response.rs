//! Downstream LMTP response parsing.

use crate::{
    error::{ClientError, ClientResult},
    status::{EnhancedCode, Reply, Status},
};

/// A single line of a (possibly multi-line) response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    pub code: u16,
    /// Whether this is the last line of the response.
    pub is_last: bool,
    pub message: String,
}

/// A complete downstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// Parses a single response line, without its line ending.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Parse` if the line doesn't match the reply format.
    pub fn parse_line(line: &str) -> ClientResult<ResponseLine> {
        let code = line
            .get(..3)
            .filter(|code| code.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| ClientError::Parse(format!("Invalid status code in '{line}'")))?;

        let is_last = match line.as_bytes().get(3) {
            None | Some(b' ') => true,
            Some(b'-') => false,
            Some(c) => {
                return Err(ClientError::Parse(format!(
                    "Invalid separator character: '{}'",
                    char::from(*c)
                )));
            }
        };

        Ok(ResponseLine {
            code,
            is_last,
            message: line.get(4..).unwrap_or_default().to_string(),
        })
    }

    /// Add a parsed line to a response being assembled.
    ///
    /// # Errors
    ///
    /// Fails if the line's code differs from the lines before it.
    pub fn push(response: &mut Option<Self>, line: ResponseLine) -> ClientResult<()> {
        match response {
            Some(existing) if existing.code != line.code => Err(ClientError::Parse(format!(
                "Status code mismatch in multi-line response: expected {}, got {}",
                existing.code, line.code
            ))),
            Some(existing) => {
                existing.lines.push(line.message);
                Ok(())
            }
            None => {
                *response = Some(Self::new(line.code, vec![line.message]));
                Ok(())
            }
        }
    }

    /// The response as a reply to relay upstream. The enhanced status code,
    /// if any, is taken from the first line.
    #[must_use]
    pub fn to_reply(&self) -> Reply {
        let text = self.lines.join(" ");
        let enhanced = EnhancedCode::parse(&text);

        let message = if enhanced.is_some() {
            text.split_once(' ')
                .map(|(_, rest)| rest.to_string())
                .unwrap_or_default()
        } else {
            text
        };

        Reply {
            status: Status::from(self.code),
            enhanced,
            message,
        }
    }
}
