//! Transactional components and their identities.

mod id;
mod traits;

pub use id::{ComponentId, ComponentIdRegistry, COMPONENT_ID_LEN};
pub use traits::TransactionalComponent;
