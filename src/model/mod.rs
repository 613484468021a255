//! Resource model: identities, attribute expressions and declarations.

mod declarations;
mod expr;
mod node;

pub use declarations::Declarations;
pub use expr::{Expression, ExpressionError, OutputRef, ResolveError};
pub use node::{Attributes, Reference, ResourceKey, ResourceNode};
