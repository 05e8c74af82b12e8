use crate::model::{Id, location::Location};
use serde::{Deserialize, Serialize};
use time::UtcDateTime;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct PostMarker;

pub type PostId = Id<PostMarker>;

#[derive(Clone, PartialEq, Debug)]
pub struct Post {
    pub id: PostId,
    pub content: PostContent,
    pub created_at: UtcDateTime,
}

/// The user supplied part of a post. Its JSON form
/// `{"user", "message", "location": {"lat", "lon"}}` is what clients send and receive.
#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct PostContent {
    pub user: String,
    pub message: String,
    pub location: Location,
}

impl Post {
    #[must_use]
    pub fn location(&self) -> Location {
        self.content.location
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{location::Location, post::PostContent};

    #[test]
    fn content_json_field_order() {
        let content = PostContent {
            user: "1111".to_owned(),
            message: "hello".to_owned(),
            location: Location {
                lat: 37.5,
                lon: -122.25,
            },
        };

        let json = serde_json::to_string(&content).unwrap();
        assert_eq!(
            json,
            r#"{"user":"1111","message":"hello","location":{"lat":37.5,"lon":-122.25}}"#
        );

        let parsed: PostContent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, content);
    }
}
