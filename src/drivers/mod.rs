//! Interrupt-driven device drivers: the periodic timer and the PS/2
//! keyboard. Each owns its singleton state and exposes the blocking
//! calls the mainline consumes.

pub mod keyboard;
pub mod timer;
