use http::StatusCode;
use std::fmt;

/// The result of the last request sent by a delivery client.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeliveryResponse {
    code: Option<StatusCode>,
    error: String,
}

impl DeliveryResponse {
    /// Status code of the last response, `None` until a response was received.
    pub fn code(&self) -> Option<StatusCode> {
        self.code
    }

    pub fn error(&self) -> &str {
        &self.error
    }

    pub(crate) fn set_code(&mut self, code: StatusCode) {
        self.code = Some(code);
    }

    pub(crate) fn set_error<E: Into<String>>(&mut self, error: E) {
        self.error = error.into();
    }
}

impl fmt::Display for DeliveryResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.code.map_or(-1, |c| i32::from(c.as_u16()));
        write!(f, "<code={code} error={}>", self.error)
    }
}
