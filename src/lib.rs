//! Ricart-Agrawala mutual exclusion between a fixed population of
//! winemaker and student processes contending for a shared pool of
//! single-slot safehouses.
//!
//! The protocol core is split into a message codec ([`message`]), a
//! Lamport clock ([`clock`]), and the two role state machines
//! ([`winemaker`], [`student`]). [`transport`], [`config`], and [`oracle`]
//! are externally-provided concerns given one concrete implementation here
//! so the crate is runnable.

pub mod clock;
pub mod config;
pub mod message;
pub mod oracle;
pub mod student;
pub mod transport;
pub mod winemaker;
