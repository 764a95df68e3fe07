use std::{ops::Deref, time::Duration};

use fake_user_agent::get_chrome_rua;
use reqwest::{redirect, Client, ClientBuilder};

use crate::{config::ProxyConfig, error::FollowResult};

/// Client shared by every request of one session.
///
/// Redirects are never followed by reqwest itself, [`crate::fetch::Fetcher`]
/// follows them so that each hop is logged and counted.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(builder: ClientBuilder) -> FollowResult<Self> {
        let client = builder.redirect(redirect::Policy::none()).build()?;
        Ok(Self { client })
    }

    pub fn with_proxy(proxy: Option<&ProxyConfig>) -> FollowResult<Self> {
        let mut builder = Client::builder()
            .user_agent(get_chrome_rua())
            .timeout(Duration::from_secs(60));
        if let Some(proxy) = proxy {
            builder = builder.proxy(proxy.to_proxy()?);
        }
        Self::new(builder)
    }
}

impl Deref for HttpClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}
