use super::Error;

/// Highest return code with a meaning assigned by SOME/IP
const LAST_RESERVED_CODE: u8 = 0x5e;

macro_rules! return_codes {
    ($($variant:ident = $value:literal),* $(,)?) => {
        /// Return code of a SOME/IP header
        ///
        /// Notifications and SD messages always carry [`ReturnCode::Ok`]; the
        /// remaining codes only matter when relaying or logging foreign traffic.
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub enum ReturnCode {
            $($variant,)*
            /// E2E codes 0x0b-0x0f, carried through unchecked
            E2E(u8),
            /// Reserved for generic errors, 0x10-0x1f
            GenericError(u8),
            /// Reserved for service specific errors, 0x20-0x5e
            InterfaceError(u8),
        }

        impl TryFrom<u8> for ReturnCode {
            type Error = Error;
            fn try_from(value: u8) -> Result<Self, Error> {
                match value {
                    $($value => Ok(ReturnCode::$variant),)*
                    0x0b..=0x0f => Ok(ReturnCode::E2E(value)),
                    0x10..=0x1f => Ok(ReturnCode::GenericError(value)),
                    0x20..=LAST_RESERVED_CODE => Ok(ReturnCode::InterfaceError(value)),
                    _ => Err(Error::InvalidReturnCode(value)),
                }
            }
        }

        impl From<ReturnCode> for u8 {
            fn from(return_code: ReturnCode) -> u8 {
                match return_code {
                    $(ReturnCode::$variant => $value,)*
                    ReturnCode::E2E(value)
                    | ReturnCode::GenericError(value)
                    | ReturnCode::InterfaceError(value) => value,
                }
            }
        }
    };
}

return_codes! {
    Ok = 0x00,
    NotOk = 0x01,
    UnknownService = 0x02,
    UnknownMethod = 0x03,
    NotReady = 0x04,
    NotReachable = 0x05,
    Timeout = 0x06,
    WrongProtocolVersion = 0x07,
    WrongInterfaceVersion = 0x08,
    MalformedMessage = 0x09,
    WrongMessageType = 0x0a,
}

impl ReturnCode {
    pub fn is_ok(&self) -> bool {
        *self == ReturnCode::Ok
    }
}
