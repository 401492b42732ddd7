pub mod signin;
pub mod userinfo;
