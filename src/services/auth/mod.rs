pub mod application;
pub mod context;
pub mod cookie;
pub mod decision;
pub mod engine;
pub mod factory;
pub mod nonce;
pub mod session;

pub use self::application::{
    Application, ApplicationError, ApplicationSettings, parse_applications,
};
pub use self::context::RequestContext;
pub use self::cookie::{CookieSettings, SameSite, SetCookie, parse_same_site};
pub use self::decision::{Decision, DenyReason};
pub use self::engine::{CallbackParams, DecisionEngine, LoginSettings, ProviderTokens};
pub use self::factory::{AuthComponents, build_decision_engine};
pub use self::session::{SessionClaims, StateClaims};
