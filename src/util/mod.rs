pub(crate) mod bitmap;
pub(crate) mod layout;
pub(crate) mod size;
