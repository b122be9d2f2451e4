mod escalation;
mod heartbeat;
mod issue;
mod progress;
mod state;
mod work_order;
mod worker;

pub use escalation::*;
pub use heartbeat::*;
pub use issue::*;
pub use progress::*;
pub use state::*;
pub use work_order::*;
pub use worker::*;
