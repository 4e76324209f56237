//! Extended query protocol backend messages.

use crate::error::Result;
use crate::protocol::codec::ResponseBody;

macro_rules! empty_message {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name;

        impl $name {
            #[doc = concat!("Parse a ", stringify!($name), " message; the body must be empty.")]
            pub fn parse(payload: &[u8]) -> Result<Self> {
                ResponseBody::new(stringify!($name), payload).finish()?;
                Ok(Self)
            }
        }
    };
}

empty_message!(
    /// ParseComplete message - statement parsing completed.
    ParseComplete
);

empty_message!(
    /// BindComplete message - parameter binding completed.
    BindComplete
);

empty_message!(
    /// CloseComplete message - statement/portal close completed.
    CloseComplete
);

empty_message!(
    /// NoData message - the described portal returns no rows.
    NoData
);
