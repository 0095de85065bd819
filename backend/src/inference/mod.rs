pub mod decision;
pub mod impl_fake;
pub mod model;
pub mod preprocess;
