//! Feed parsing.
//!
//! Turns iCalendar documents into normalized [`RawFeedEvent`](crate::event::RawFeedEvent)s.

mod parse;

pub(crate) use parse::localize;
pub use parse::{ParseOptions, parse_feed};
