//! Request-boundary API for user records.
//!
//! # Responsibility
//! - Decode request bodies and path ids into core calls.
//! - Map the core error taxonomy to transport statuses and client messages.
//!
//! # Invariants
//! - Calls never panic and always return a response envelope.
//! - Internal failures are logged with operation and id, and reach the
//!   client only as a generic message.

use log::{error, info};
use serde::Serialize;
use serde_json::{json, Value};
use usercrud_core::{
    CancellationToken, User, UserId, UserRepository, UserService, UserServiceError,
};

pub const STATUS_OK: u16 = 200;
pub const STATUS_CREATED: u16 = 201;
pub const STATUS_NO_CONTENT: u16 = 204;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_CONFLICT: u16 = 409;
/// Client went away before the response was produced.
pub const STATUS_CLIENT_CLOSED: u16 = 499;
pub const STATUS_INTERNAL_ERROR: u16 = 500;

const MSG_BIND_FAILED: &str = "Failed to bind request body";
const MSG_ID_NOT_A_NUMBER: &str = "'id' is not a number";
const MSG_ALREADY_EXISTS: &str = "username already in use";
const MSG_NOT_FOUND: &str = "user does not exist";
const MSG_CANCELLED: &str = "Request cancelled";

/// Response envelope: status code plus JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    /// `null` for empty bodies, `{"message": ...}` for errors.
    pub body: Value,
}

impl ApiResponse {
    fn json(status: u16, payload: &impl Serialize) -> Self {
        match serde_json::to_value(payload) {
            Ok(body) => Self { status, body },
            Err(err) => {
                error!(
                    "event=api_encode module=api status=error error_code=encode_failed error={}",
                    err
                );
                Self::message(STATUS_INTERNAL_ERROR, "Failed to encode response")
            }
        }
    }

    fn message(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "message": message.into() }),
        }
    }

    fn empty(status: u16) -> Self {
        Self {
            status,
            body: Value::Null,
        }
    }

    /// Error message carried in the body, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.body.get("message").and_then(Value::as_str)
    }
}

/// Boundary facade over [`UserService`].
pub struct UserApi<R: UserRepository> {
    service: UserService<R>,
}

impl<R: UserRepository> UserApi<R> {
    pub fn new(repo: R) -> Self {
        Self {
            service: UserService::new(repo),
        }
    }

    /// `GET /users`
    pub fn list(&self, cancel: &CancellationToken) -> ApiResponse {
        match self.service.list(cancel) {
            Ok(users) => ApiResponse::json(STATUS_OK, &users),
            Err(err) => failure("user_list", None, &err, "Failed to get users"),
        }
    }

    /// `POST /users`
    pub fn create(&self, body: &str, cancel: &CancellationToken) -> ApiResponse {
        let mut user = match decode_user(body) {
            Ok(user) => user,
            Err(response) => return response,
        };

        match self.service.create(cancel, &mut user) {
            Ok(()) => ApiResponse::json(STATUS_CREATED, &user),
            Err(err) => failure("user_create", None, &err, "Failed to create user"),
        }
    }

    /// `PUT /users/{id}`
    pub fn update(&self, id_param: &str, body: &str, cancel: &CancellationToken) -> ApiResponse {
        let id = match parse_id(id_param) {
            Ok(id) => id,
            Err(response) => return response,
        };
        let mut user = match decode_user(body) {
            Ok(user) => user,
            Err(response) => return response,
        };

        match self.service.update(cancel, id, &mut user) {
            Ok(()) => ApiResponse::json(STATUS_OK, &user),
            Err(err) => failure("user_update", Some(id), &err, "Failed to update user"),
        }
    }

    /// `DELETE /users/{id}`
    pub fn delete(&self, id_param: &str, cancel: &CancellationToken) -> ApiResponse {
        let id = match parse_id(id_param) {
            Ok(id) => id,
            Err(response) => return response,
        };

        match self.service.delete(cancel, id) {
            Ok(()) => ApiResponse::empty(STATUS_NO_CONTENT),
            Err(err) => failure("user_delete", Some(id), &err, "Failed to delete user"),
        }
    }
}

fn decode_user(body: &str) -> Result<User, ApiResponse> {
    serde_json::from_str::<User>(body).map_err(|err| {
        info!(
            "event=api_bind module=api status=error error_code=bind_failed line={} column={}",
            err.line(),
            err.column()
        );
        ApiResponse::message(STATUS_BAD_REQUEST, MSG_BIND_FAILED)
    })
}

fn parse_id(raw: &str) -> Result<UserId, ApiResponse> {
    raw.parse::<UserId>().map_err(|_| {
        info!("event=api_parse_id module=api status=error error_code=id_not_a_number");
        ApiResponse::message(STATUS_BAD_REQUEST, MSG_ID_NOT_A_NUMBER)
    })
}

fn failure(
    event: &str,
    user_id: Option<UserId>,
    err: &UserServiceError,
    internal_message: &str,
) -> ApiResponse {
    match err {
        UserServiceError::Validation(violations) => {
            ApiResponse::message(STATUS_BAD_REQUEST, violations.to_string())
        }
        UserServiceError::AlreadyExists(_) => {
            ApiResponse::message(STATUS_CONFLICT, MSG_ALREADY_EXISTS)
        }
        UserServiceError::NotFound(_) => ApiResponse::message(STATUS_NOT_FOUND, MSG_NOT_FOUND),
        UserServiceError::Cancelled => ApiResponse::message(STATUS_CLIENT_CLOSED, MSG_CANCELLED),
        UserServiceError::Storage(inner) => {
            let user_id = user_id.map_or_else(|| "none".to_string(), |id| id.to_string());
            error!(
                "event={} module=api status=error user_id={} error_code=internal error={}",
                event, user_id, inner
            );
            ApiResponse::message(STATUS_INTERNAL_ERROR, internal_message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ApiResponse, UserApi, STATUS_BAD_REQUEST, STATUS_CLIENT_CLOSED, STATUS_CONFLICT,
        STATUS_CREATED, STATUS_NOT_FOUND, STATUS_NO_CONTENT, STATUS_OK,
    };
    use serde_json::Value;
    use usercrud_core::{CancellationToken, InMemoryUserRepository};

    const PIKACHU: &str = r#"{
        "user_name": "Pikachu",
        "first_name": "Pika",
        "last_name": "Chu",
        "email": "pikachu@yahoo.com",
        "user_status": "I",
        "department": "Pokemon"
    }"#;

    fn api() -> UserApi<InMemoryUserRepository> {
        UserApi::new(InMemoryUserRepository::new())
    }

    fn created_id(response: &ApiResponse) -> i64 {
        response.body["id"].as_i64().expect("created user should have id")
    }

    #[test]
    fn create_returns_201_with_assigned_id() {
        let api = api();
        let response = api.create(PIKACHU, &CancellationToken::new());

        assert_eq!(response.status, STATUS_CREATED);
        assert!(created_id(&response) > 0);
        assert_eq!(response.body["user_name"], "Pikachu");
        assert_eq!(response.body["user_status"], "I");
        assert_eq!(response.body["department"], "Pokemon");
    }

    #[test]
    fn create_duplicate_returns_409() {
        let api = api();
        let cancel = CancellationToken::new();
        assert_eq!(api.create(PIKACHU, &cancel).status, STATUS_CREATED);

        let response = api.create(PIKACHU, &cancel);
        assert_eq!(response.status, STATUS_CONFLICT);
        assert_eq!(response.error_message(), Some("username already in use"));
    }

    #[test]
    fn validation_failures_are_combined_into_one_message() {
        let api = api();
        let response = api.create(
            r#"{"first_name":"Pika","last_name":"Chu","email":"nope","user_status":"_"}"#,
            &CancellationToken::new(),
        );

        assert_eq!(response.status, STATUS_BAD_REQUEST);
        assert_eq!(
            response.error_message(),
            Some("'user_name' is missing\n'email' is invalid\n'user_status' is invalid")
        );
    }

    #[test]
    fn null_required_fields_are_reported_by_validation() {
        let api = api();
        let response = api.create(
            r#"{"user_name":"Pikachu","first_name":"Pika","last_name":"Chu","email":"pikachu@yahoo.com","user_status":null,"department":null}"#,
            &CancellationToken::new(),
        );

        assert_eq!(response.status, STATUS_BAD_REQUEST);
        assert_eq!(response.error_message(), Some("'user_status' is missing"));
    }

    #[test]
    fn malformed_body_and_id_return_400() {
        let api = api();
        let cancel = CancellationToken::new();

        let bad_body = api.create("{not json", &cancel);
        assert_eq!(bad_body.status, STATUS_BAD_REQUEST);
        assert_eq!(bad_body.error_message(), Some("Failed to bind request body"));

        let bad_id = api.delete("abc", &cancel);
        assert_eq!(bad_id.status, STATUS_BAD_REQUEST);
        assert_eq!(bad_id.error_message(), Some("'id' is not a number"));

        for padded in [" 7", "7 ", "+ 7"] {
            let response = api.delete(padded, &cancel);
            assert_eq!(response.status, STATUS_BAD_REQUEST, "{padded:?}");
        }
    }

    #[test]
    fn update_and_delete_lifecycle() {
        let api = api();
        let cancel = CancellationToken::new();
        let id = created_id(&api.create(PIKACHU, &cancel)).to_string();

        let updated = api.update(&id, &PIKACHU.replace("\"I\"", "\"T\""), &cancel);
        assert_eq!(updated.status, STATUS_OK);
        assert_eq!(updated.body["user_status"], "T");

        let listed = api.list(&cancel);
        assert_eq!(listed.status, STATUS_OK);
        assert_eq!(listed.body.as_array().map(Vec::len), Some(1));

        let deleted = api.delete(&id, &cancel);
        assert_eq!(deleted.status, STATUS_NO_CONTENT);
        assert_eq!(deleted.body, Value::Null);

        let missing = api.delete(&id, &cancel);
        assert_eq!(missing.status, STATUS_NOT_FOUND);
        assert_eq!(missing.error_message(), Some("user does not exist"));

        let missing_update = api.update(&id, PIKACHU, &cancel);
        assert_eq!(missing_update.status, STATUS_NOT_FOUND);
    }

    #[test]
    fn cancelled_request_maps_to_client_closed() {
        let api = api();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let response = api.list(&cancel);
        assert_eq!(response.status, STATUS_CLIENT_CLOSED);
    }
}
