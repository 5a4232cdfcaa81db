use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Query parameter carrying the server identity in a share link.
pub const LINK_PARAM: &str = "id";

/// Opaque peer identity. On the wire it is always a hyphenated UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerId(Uuid);

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("link is not a valid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("link has no `id` parameter")]
    MissingId,

    #[error("{0:?} is not a peer identity")]
    InvalidId(String),

    #[error("unsupported link scheme {0:?}")]
    UnsupportedScheme(String),
}

impl PeerId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for PeerId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for PeerId {
    type Err = LinkError;

    /// Accepts only the `8-4-4-4-12` hex form; braced, urn and simple UUID
    /// spellings are not trusted as connection targets.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !is_peer_token(s) {
            return Err(LinkError::InvalidId(s.to_string()));
        }
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| LinkError::InvalidId(s.to_string()))
    }
}

impl TryFrom<String> for PeerId {
    type Error = LinkError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PeerId> for String {
    fn from(id: PeerId) -> Self {
        id.to_string()
    }
}

fn is_peer_token(s: &str) -> bool {
    s.len() == 36
        && s.char_indices().all(|(i, c)| match i {
            8 | 13 | 18 | 23 => c == '-',
            _ => c.is_ascii_hexdigit(),
        })
}

/// Embed `id` into `base` as the `id` query parameter.
pub fn share_link(base: &Url, id: PeerId) -> Url {
    let mut link = base.clone();
    link.query_pairs_mut().append_pair(LINK_PARAM, &id.to_string());
    link
}

/// Extract the target identity from a share link. A bare identity is accepted too.
pub fn parse_link(link: &str) -> Result<PeerId, LinkError> {
    let link = link.trim();
    if is_peer_token(link) {
        return link.parse();
    }

    let url = Url::parse(link)?;
    let id = url
        .query_pairs()
        .find(|(key, _)| key == LINK_PARAM)
        .map(|(_, value)| value.into_owned())
        .ok_or(LinkError::MissingId)?;
    id.parse()
}
