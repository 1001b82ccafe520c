mod owner_auth;
mod reseller_auth;

pub use owner_auth::*;
pub use reseller_auth::*;
