use crate::built_info;
use const_format::concatcp;
use lazy_static::lazy_static;
use reqwest::Client;

pub const USER_AGENT: &str = concatcp!(built_info::PKG_NAME, "/", built_info::PKG_VERSION);

lazy_static! {
    pub static ref CLIENT: Client = Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .expect("HTTP client with static configuration");
}
