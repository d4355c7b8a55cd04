//! # Event subscribers.
//!
//! [`Subscribe`] is the extension point for observing runtime events published on the
//! [`Bus`](crate::events::Bus); [`SubscriberSet`] fans events out to several subscribers.
//!
//! ## Architecture
//! ```text
//!   Context / Registry / Coordinator / Controller
//!        │ publish(Event)
//!        ▼
//!       Bus ──► event listener ──► SubscriberSet ──┬──► LogWriter (feature "logging")
//!                                                  ├──► Metrics
//!                                                  └──► Custom ...
//! ```

#[cfg(feature = "logging")]
mod embedded;
mod subscriber;
mod subscriber_set;

#[cfg(feature = "logging")]
pub use embedded::LogWriter;
pub use subscriber::Subscribe;
pub use subscriber_set::SubscriberSet;
