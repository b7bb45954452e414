//! Bundled credential providers.

mod jwt;
mod oauth2;
mod statics;

pub use jwt::JwtProvider;
pub use oauth2::OAuth2Provider;
pub use statics::{ApiKeyProvider, BasicProvider, BearerProvider};
