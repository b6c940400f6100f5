//! Macros for reducing event boilerplate.

/// Auto-implement [`Event::to_json`](crate::Event::to_json) for events that
/// derive `Serialize`.
///
/// Use this inside your `Event` impl block so the event can cross a
/// [`StreamConnector`](crate::StreamConnector).
///
/// # Example
///
/// ```ignore
/// use tickbridge::{auto_serialize, Event};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct ChatLine {
///     text: String,
/// }
///
/// impl Event for ChatLine {
///     fn kind(&self) -> &'static str {
///         "chat.line"
///     }
///
///     auto_serialize!();
/// }
/// ```
#[macro_export]
macro_rules! auto_serialize {
    () => {
        fn to_json(&self) -> ::core::option::Option<$crate::__private::serde_json::Value> {
            $crate::__private::serde_json::to_value(self).ok()
        }
    };
}
