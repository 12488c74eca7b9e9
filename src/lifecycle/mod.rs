//! Application bootstrap and server lifecycle.
//!
//! ```text
//! 1. Configuration loading
//!    ↓
//! 2. Module registration
//!    ↓
//! 3. Provider resolution (pending factories awaited)
//!    ↓
//! 4. Controller binding
//!    ↓
//! 5. listen()                 → ServerEvent::Start
//!    ↓
//! [Serving...]
//!    ↓
//! 6. close()                  → ServerEvent::Close
//! ```

mod application;
mod events;

pub use application::{Application, ApplicationBuilder};
pub use events::{ServerEvent, ServerEvents};
