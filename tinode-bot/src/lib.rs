//! tinode-bot: a long-running Tinode bot.
//!
//! Logs every message it receives and, in echo mode, replies with the same
//! content.

pub mod echo;
