use axum::http::Method;
use strum_macros::{Display, EnumString};

/// HTTP methods a route can be bound to. `All` matches any request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    All,
}

impl HttpMethod {
    /// Whether a route bound to `self` serves a request made with `request`.
    pub fn accepts(self, request: HttpMethod) -> bool {
        self == HttpMethod::All || self == request
    }
}

impl TryFrom<&Method> for HttpMethod {
    type Error = strum::ParseError;

    fn try_from(method: &Method) -> Result<Self, Self::Error> {
        match method.as_str().parse()? {
            // wildcard for route declarations only
            HttpMethod::All => Err(strum::ParseError::VariantNotFound),
            parsed => Ok(parsed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        assert_eq!("get".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
        assert_eq!(HttpMethod::Delete.to_string(), "DELETE");
        assert!("BREW".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn test_from_http_method() {
        assert_eq!(HttpMethod::try_from(&Method::PATCH).unwrap(), HttpMethod::Patch);
        assert!(HttpMethod::try_from(&Method::CONNECT).is_err());
        assert!(HttpMethod::try_from(&Method::from_bytes(b"ALL").unwrap()).is_err());
    }

    #[test]
    fn test_all_accepts_everything() {
        assert!(HttpMethod::All.accepts(HttpMethod::Put));
        assert!(HttpMethod::Get.accepts(HttpMethod::Get));
        assert!(!HttpMethod::Get.accepts(HttpMethod::Post));
    }
}
