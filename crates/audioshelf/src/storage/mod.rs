pub mod handoff;
pub mod layout;
pub mod packager;

pub use handoff::{HandoffMeta, VoucherDocument};
pub use layout::ArtifactLayout;
pub use packager::package;
