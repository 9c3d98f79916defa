pub mod aggregate;
pub mod authorize;
pub mod error;
pub mod extract;
pub mod ids;
pub mod lifecycle;
pub mod model;
pub mod notify;
pub mod overdue;
pub mod types;

pub use aggregate::*;
pub use authorize::*;
pub use error::*;
pub use extract::*;
pub use ids::*;
pub use lifecycle::*;
pub use model::*;
pub use notify::*;
pub use overdue::*;
pub use types::*;
