use bytes::Bytes;
use reqwest::{header::LOCATION, Response, StatusCode};
use url::Url;

use crate::{
    error::{FollowError, FollowResult},
    util::http::HttpClient,
};

/// Maximum hops followed for one logical request.
pub const MAX_REDIRECTS: usize = 10;

/// Status codes treated as redirects, `Location` is followed for each of them.
const REDIRECT_RANGE: std::ops::RangeInclusive<u16> = 300..=310;

/// Outcome of a single round trip, before the body is consumed.
enum Hop {
    Redirect(Url),
    Done(Response),
}

/// Issues GET requests and follows redirects by hand.
///
/// Every network step of a session goes through [`Fetcher::get`]: transport
/// errors, non-success status codes and broken redirect chains come back as
/// `Err`, and the body of the final 2xx response as `Ok`.
#[derive(Clone)]
pub struct Fetcher {
    client: HttpClient,
    max_redirects: usize,
}

impl Fetcher {
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            max_redirects: MAX_REDIRECTS,
        }
    }

    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    /// Fetch `url` and return the body of the final response.
    ///
    /// `step` is only used to label log lines.
    pub async fn get(&self, step: &str, url: Url) -> FollowResult<Bytes> {
        let mut url = url;
        let mut redirects = 0;

        loop {
            match self.hop(&url).await? {
                Hop::Done(response) => return Ok(response.bytes().await?),
                Hop::Redirect(target) => {
                    if redirects >= self.max_redirects {
                        log::warn!("{step} exceeded redirect limit at {target}");
                        return Err(FollowError::TooManyRedirects(self.max_redirects));
                    }
                    redirects += 1;
                    log::debug!("{step} redirected to {target}");
                    url = target;
                }
            }
        }
    }

    async fn hop(&self, url: &Url) -> FollowResult<Hop> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();

        if is_redirect(status) {
            return redirect_target(url, &response).map(Hop::Redirect);
        }

        if !status.is_success() {
            if let Ok(body) = response.text().await {
                log::debug!("Error body: {body}");
            }
            return Err(FollowError::HttpError(status));
        }

        Ok(Hop::Done(response))
    }
}

fn redirect_target(base: &Url, response: &Response) -> FollowResult<Url> {
    let location = response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok());

    match location {
        Some(location) => base
            .join(location)
            .map_err(|_| FollowError::InvalidRedirect(Some(location.to_string()))),
        None => Err(FollowError::InvalidRedirect(None)),
    }
}

/// Whether `status` belongs to the redirect range followed by [`Fetcher`].
pub fn is_redirect(status: StatusCode) -> bool {
    REDIRECT_RANGE.contains(&status.as_u16())
}
