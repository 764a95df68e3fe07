//! Distribution API: access token, usher (manifest selection) and the media
//! playlist itself.

use std::{fmt, str::FromStr};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    error::{FollowError, FollowResult},
    fetch::Fetcher,
};

pub const DEFAULT_API_BASE: &str = "http://api.twitch.tv/api";
pub const DEFAULT_USHER_BASE: &str = "http://usher.twitch.tv";

/// Body the usher returns when the channel is not live.
const OFFLINE_MARKER: &str = "[]";

/// Shape of the manifest selection request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsherVariant {
    /// `/api/channel/hls/{stream}.m3u8?player=twitchweb&type=any&sig=..&token=..`
    #[default]
    Hls,
    /// `/select/{stream}.json?nauthsig=..&nauth=..`
    Select,
}

impl FromStr for UsherVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hls" => Ok(Self::Hls),
            "select" => Ok(Self::Select),
            _ => Err(format!("unknown usher variant: {s}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiEndpoints {
    pub api_base: Url,
    pub usher_base: Url,
    pub variant: UsherVariant,
}

impl Default for ApiEndpoints {
    fn default() -> Self {
        Self {
            api_base: Url::parse(DEFAULT_API_BASE).expect("default api base is a valid url"),
            usher_base: Url::parse(DEFAULT_USHER_BASE).expect("default usher base is a valid url"),
            variant: UsherVariant::default(),
        }
    }
}

impl ApiEndpoints {
    pub fn with_base(api_base: Url, usher_base: Url) -> Self {
        Self {
            api_base,
            usher_base,
            variant: UsherVariant::default(),
        }
    }

    pub fn with_variant(mut self, variant: UsherVariant) -> Self {
        self.variant = variant;
        self
    }

    pub fn access_token_url(&self, stream: &str) -> FollowResult<Url> {
        let base = self.api_base.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/channels/{stream}/access_token"))?)
    }

    pub fn usher_url(&self, stream: &str, credentials: &Credentials) -> FollowResult<Url> {
        let base = self.usher_base.as_str().trim_end_matches('/');
        let url = match self.variant {
            UsherVariant::Hls => {
                let mut url = Url::parse(&format!("{base}/api/channel/hls/{stream}.m3u8"))?;
                url.query_pairs_mut()
                    .append_pair("player", "twitchweb")
                    .append_pair("type", "any")
                    .append_pair("sig", &credentials.sig)
                    .append_pair("token", &credentials.token)
                    .append_pair("allow_source", "true");
                url
            }
            UsherVariant::Select => {
                let mut url = Url::parse(&format!("{base}/select/{stream}.json"))?;
                url.query_pairs_mut()
                    .append_pair("nauthsig", &credentials.sig)
                    .append_pair("nauth", &credentials.token)
                    .append_pair("allow_source", "true");
                url
            }
        };
        Ok(url)
    }
}

/// Token and signature pair, both opaque.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
    pub sig: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &format_args!("<{} bytes>", self.token.len()))
            .field("sig", &self.sig)
            .finish()
    }
}

#[derive(Deserialize)]
struct AccessTokenResponse {
    token: Option<String>,
    sig: Option<String>,
}

/// Decode the access token payload.
///
/// Malformed JSON is a [`FollowError::JsonError`], a missing or empty field is
/// [`FollowError::MissingCredentials`]. Callers retry the former and give up
/// on the latter.
pub fn decode_access_token(body: &[u8]) -> FollowResult<Credentials> {
    let response: AccessTokenResponse = serde_json::from_slice(body)?;
    match (response.token, response.sig) {
        (Some(token), Some(sig)) if !token.is_empty() && !sig.is_empty() => {
            Ok(Credentials { token, sig })
        }
        _ => Err(FollowError::MissingCredentials),
    }
}

/// Pick the manifest url out of an usher response.
pub fn parse_usher_response(body: &str) -> FollowResult<Url> {
    if body.trim() == OFFLINE_MARKER {
        return Err(FollowError::ChannelOffline);
    }

    let line = body
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("http"))
        .ok_or(FollowError::ManifestNotFound)?;
    Ok(Url::parse(line)?)
}

/// Segment names of a media playlist, in playlist order.
pub fn segment_names(body: &str) -> impl Iterator<Item = &str> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

/// Append a segment name to the directory of the manifest it was listed in.
///
/// The name is taken literally, never resolved as a reference, so a segment
/// always stays on the manifest's host. The manifest's own query is not
/// carried over.
pub fn segment_url(manifest: &Url, name: &str) -> Url {
    let mut url = manifest.clone();
    let dir = match manifest.path().rfind('/') {
        Some(slash) => &manifest.path()[..=slash],
        None => "/",
    };
    url.set_path(&format!("{dir}{name}"));
    url.set_query(None);
    url.set_fragment(None);
    url
}

/// Network side of one session.
#[derive(Clone)]
pub struct UsherClient {
    fetcher: Fetcher,
    endpoints: ApiEndpoints,
}

impl UsherClient {
    pub fn new(fetcher: Fetcher, endpoints: ApiEndpoints) -> Self {
        Self { fetcher, endpoints }
    }

    pub fn endpoints(&self) -> &ApiEndpoints {
        &self.endpoints
    }

    pub async fn access_token(&self, stream: &str) -> FollowResult<Credentials> {
        let url = self.endpoints.access_token_url(stream)?;
        log::info!("[{stream}] Reauthing: {url}");
        let body = self.fetcher.get("token", url).await?;
        decode_access_token(&body)
    }

    pub async fn resolve_manifest(
        &self,
        stream: &str,
        credentials: &Credentials,
    ) -> FollowResult<Url> {
        let url = self.endpoints.usher_url(stream, credentials)?;
        log::info!("[{stream}] Requested usher: {url}");
        let body = self.fetcher.get("usher", url).await?;
        parse_usher_response(&String::from_utf8_lossy(&body))
    }

    pub async fn manifest(&self, url: Url) -> FollowResult<String> {
        let body = self.fetcher.get("m3u", url).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    pub async fn segment(&self, url: Url) -> FollowResult<Bytes> {
        self.fetcher.get("save", url).await
    }
}
