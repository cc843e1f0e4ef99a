//! Authoritative server for a two-player snake arcade game played over
//! plain TCP with newline-framed text messages.
//!
//! Clients connect and are paired first come, first served by the
//! [`matchmaker`]. Each pair gets its own [`session`] task which counts the
//! match in, then steps the [`game`] simulation at a fixed tick rate and
//! broadcasts a field snapshot to both players after every tick. Player
//! input is a thin stream of direction and turbo commands; the server is
//! the single source of truth for all game state.
//!
//! Levels come from text files parsed by [`map`], with a generated bordered
//! arena as the fallback. The wire protocol lives in the `shared` crate so
//! test clients can speak it too.

pub mod connection;
pub mod game;
pub mod map;
pub mod matchmaker;
pub mod player;
pub mod registry;
pub mod rng;
pub mod session;
