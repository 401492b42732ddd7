pub mod authorize;
pub mod health;
pub mod signin;
pub mod signout;
pub mod userinfo;
