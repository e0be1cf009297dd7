//! Loaders turn project sources into build outputs: scripts are bundled by
//! [`js`], stylesheets compiled by [`css`], both find their inputs through
//! [`glob`].

pub mod css;
pub(crate) mod glob;
pub mod js;
