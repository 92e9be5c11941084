use crate::errors::{ErrorKind, NextcloudError};

/// Remote status codes with a fixed meaning in the error taxonomy.
/// 5xx is handled as a range; anything else unexpected is a protocol error.
const STATUS_TABLE: &[(u16, ErrorKind)] = &[
    (401, ErrorKind::AuthError),
    (403, ErrorKind::AuthError),
    (404, ErrorKind::NotFound),
    (405, ErrorKind::Conflict),
    (409, ErrorKind::Conflict),
    (412, ErrorKind::Conflict),
    (423, ErrorKind::Conflict),
    // OCS meta codes: server error, not authorized
    (996, ErrorKind::RemoteUnavailable),
    (997, ErrorKind::AuthError),
];

pub fn classify(status: u16) -> ErrorKind {
    if let Some((_, kind)) = STATUS_TABLE.iter().find(|(code, _)| *code == status) {
        return *kind;
    }
    match status {
        500..=599 => ErrorKind::RemoteUnavailable,
        _ => ErrorKind::ProtocolError,
    }
}

/// Remote call types, each with its own accepted statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCall {
    Upload,
    Download,
    ZipDownload,
    CreateCollection,
    Delete,
    MoveOrCopy,
    Propfind,
    ShareCreate,
}

struct Expectation {
    success: &'static [u16],
    /// Statuses meaning the desired end state already holds
    already: &'static [u16],
}

impl RemoteCall {
    fn expectation(&self) -> Expectation {
        match self {
            RemoteCall::Upload => Expectation { success: &[200, 201, 204], already: &[] },
            RemoteCall::Download | RemoteCall::ZipDownload => Expectation { success: &[200], already: &[] },
            RemoteCall::CreateCollection => Expectation { success: &[201], already: &[405] },
            RemoteCall::Delete => Expectation { success: &[200, 204], already: &[404] },
            RemoteCall::MoveOrCopy => Expectation { success: &[201, 204], already: &[] },
            RemoteCall::Propfind => Expectation { success: &[207], already: &[] },
            RemoteCall::ShareCreate => Expectation { success: &[200], already: &[] },
        }
    }
}

/// How an accepted status should be read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Applied,
    AlreadyInPlace,
}

/// Accepted disposition of `status` for `call`, if it is accepted at all
pub fn accepts(call: RemoteCall, status: u16) -> Option<Disposition> {
    let expectation = call.expectation();
    if expectation.success.contains(&status) {
        Some(Disposition::Applied)
    } else if expectation.already.contains(&status) {
        Some(Disposition::AlreadyInPlace)
    } else {
        None
    }
}

/// Error for a status that was not accepted
pub fn failure(status: u16, message: String) -> NextcloudError {
    let kind = if (200..300).contains(&status) {
        // A 2xx outside the accepted set means the server did something we did not ask for
        ErrorKind::ProtocolError
    } else {
        classify(status)
    };
    NextcloudError::Remote { status, kind, message }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interpret(call: RemoteCall, status: u16, message: &str) -> Result<Disposition, NextcloudError> {
        accepts(call, status).ok_or_else(|| failure(status, message.to_string()))
    }

    fn kind_of(call: RemoteCall, status: u16) -> ErrorKind {
        interpret(call, status, "").unwrap_err().kind()
    }

    #[test]
    fn test_table_classification() {
        assert_eq!(classify(401), ErrorKind::AuthError);
        assert_eq!(classify(403), ErrorKind::AuthError);
        assert_eq!(classify(404), ErrorKind::NotFound);
        assert_eq!(classify(405), ErrorKind::Conflict);
        assert_eq!(classify(409), ErrorKind::Conflict);
        assert_eq!(classify(412), ErrorKind::Conflict);
        assert_eq!(classify(500), ErrorKind::RemoteUnavailable);
        assert_eq!(classify(503), ErrorKind::RemoteUnavailable);
        assert_eq!(classify(400), ErrorKind::ProtocolError);
        assert_eq!(classify(302), ErrorKind::ProtocolError);
    }

    #[test]
    fn test_idempotent_statuses() {
        assert_eq!(interpret(RemoteCall::CreateCollection, 201, "").unwrap(), Disposition::Applied);
        assert_eq!(interpret(RemoteCall::CreateCollection, 405, "").unwrap(), Disposition::AlreadyInPlace);
        assert_eq!(interpret(RemoteCall::Delete, 204, "").unwrap(), Disposition::Applied);
        assert_eq!(interpret(RemoteCall::Delete, 404, "").unwrap(), Disposition::AlreadyInPlace);
    }

    #[test]
    fn test_not_found_outside_delete() {
        assert_eq!(kind_of(RemoteCall::Download, 404), ErrorKind::NotFound);
        assert_eq!(kind_of(RemoteCall::Propfind, 404), ErrorKind::NotFound);
    }

    #[test]
    fn test_move_precondition_is_conflict() {
        assert_eq!(kind_of(RemoteCall::MoveOrCopy, 412), ErrorKind::Conflict);
        assert_eq!(kind_of(RemoteCall::MoveOrCopy, 502), ErrorKind::RemoteUnavailable);
    }

    #[test]
    fn test_unexpected_success_status_is_protocol_error() {
        assert_eq!(kind_of(RemoteCall::Propfind, 200), ErrorKind::ProtocolError);
        assert_eq!(kind_of(RemoteCall::ShareCreate, 201), ErrorKind::ProtocolError);
    }

    #[test]
    fn test_message_is_kept() {
        match interpret(RemoteCall::Upload, 507, "Insufficient storage") {
            Err(NextcloudError::Remote { status, message, .. }) => {
                assert_eq!(status, 507);
                assert_eq!(message, "Insufficient storage");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
