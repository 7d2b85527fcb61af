//! JSON command protocol spoken with the publisher endpoint.
//!
//! Every call is a `Request { command, params }` and every answer a
//! `Response` tagged by `status`, so failures arrive as data rather than
//! HTTP errors and map onto `Result` in one place.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::materialized::RemoteEventRef;
use crate::metadata::PublishedEvent;
use crate::source::GroupId;

pub trait PublisherCommand: Serialize {
    type Response: DeserializeOwned;
    fn command() -> Command;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    ListGroups,
    CreateEvent,
    DeleteEvent,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Request {
    pub command: Command,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response<T> {
    Success { data: T },
    Error { error: String },
}

impl<T> Response<T> {
    pub fn into_result(self) -> Result<T, String> {
        match self {
            Response::Success { data } => Ok(data),
            Response::Error { error } => Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListGroups {}

impl PublisherCommand for ListGroups {
    type Response = Vec<Group>;
    fn command() -> Command {
        Command::ListGroups
    }
}

#[derive(Debug, Serialize)]
pub struct CreateEvent<'a> {
    pub event: &'a PublishedEvent,
}

impl PublisherCommand for CreateEvent<'_> {
    type Response = RemoteEventRef;
    fn command() -> Command {
        Command::CreateEvent
    }
}

#[derive(Debug, Serialize)]
pub struct DeleteEvent<'a> {
    #[serde(flatten)]
    pub remote: &'a RemoteEventRef,
}

impl PublisherCommand for DeleteEvent<'_> {
    type Response = serde_json::Value;
    fn command() -> Command {
        Command::DeleteEvent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_status_tags() {
        let ok: Response<RemoteEventRef> =
            serde_json::from_str(r#"{"status":"success","data":{"id":"12","uuid":"a-b"}}"#).unwrap();
        assert_eq!(
            ok.into_result(),
            Ok(RemoteEventRef {
                id: "12".into(),
                uuid: Some("a-b".into())
            })
        );

        let err: Response<RemoteEventRef> =
            serde_json::from_str(r#"{"status":"error","error":"group 4 is gone"}"#).unwrap();
        assert_eq!(err.into_result(), Err("group 4 is gone".to_string()));
    }

    #[test]
    fn test_delete_params_are_flat() {
        let remote = RemoteEventRef {
            id: "9".into(),
            uuid: None,
        };
        let request = Request {
            command: DeleteEvent::command(),
            params: serde_json::to_value(DeleteEvent { remote: &remote }).unwrap(),
        };

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({"command": "delete_event", "params": {"id": "9"}})
        );
    }
}
