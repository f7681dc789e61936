use std::future::Future;
use std::pin::Pin;

use crate::{SideInputError, SideInputKey};

/// Reload callback of a consumer container.
///
/// Called by the watch loop with the value of the newest observed version.
/// The implementation must not expose a half-applied value to the data path:
/// build the new state first, then swap it in. Returning an error keeps the
/// consumer's cursor at the previously applied version.
pub trait UpdateHandler: Send + Sync {
    fn on_side_input_update<'a>(
        &'a self,
        key: &'a SideInputKey,
        value: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), SideInputError>> + Send + 'a>>;
}
