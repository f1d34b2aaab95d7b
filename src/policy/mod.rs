pub mod intent;
pub mod lower;
pub mod model;
pub mod render;

pub use model::{
    GeneralPolicies, Interval, Operator, PathMethodPolicies, PathPolicies, PolicyAtom,
    PolicyClause, Service,
};
