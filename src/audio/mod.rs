//! # Audio Module
//!
//! El núcleo del bot: una cola FIFO y un worker de reproducción por guild,
//! coordinados por el [`controller::PlayerController`] que exponen los
//! comandos. El registro de "ahora suena" es el único estado que escriben
//! los workers y leen los handlers.

pub mod controller;
pub mod now_playing;
pub mod queue;
pub mod worker;
