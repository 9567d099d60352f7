use super::*;
use crate::frame::{FRAME_RETRYABLE, SYSCALL_NEW_MESSAGE};

fn alice() -> UserId {
    UserId::new("alice")
}

fn inbound(frame: &Frame) -> String {
    serde_json::to_string(frame).expect("frame should serialize")
}

#[test]
fn heartbeat_gets_done_reply() {
    let req = Frame::request(SYSCALL_HEARTBEAT, Data::new());

    let replies = process_inbound_text(&alice(), Uuid::new_v4(), &inbound(&req));

    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].status, Status::Done);
    assert_eq!(replies[0].parent_id, Some(req.id));
    assert_eq!(replies[0].syscall, SYSCALL_HEARTBEAT);
}

#[test]
fn invalid_json_gets_gateway_error() {
    let replies = process_inbound_text(&alice(), Uuid::new_v4(), "{not json");

    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].syscall, SYSCALL_GATEWAY_ERROR);
    assert_eq!(replies[0].data.get(FRAME_CODE).and_then(|v| v.as_str()), Some("E_INVALID_FRAME"));
    assert!(replies[0].parent_id.is_none());
}

#[test]
fn unknown_syscall_gets_correlated_gateway_error() {
    let req = Frame::request("board:join", Data::new());

    let replies = process_inbound_text(&alice(), Uuid::new_v4(), &inbound(&req));

    assert_eq!(replies.len(), 1);
    let err = &replies[0];
    assert_eq!(err.syscall, SYSCALL_GATEWAY_ERROR);
    assert_eq!(err.status, Status::Error);
    assert_eq!(err.parent_id, Some(req.id));
    assert_eq!(err.data.get(FRAME_CODE).and_then(|v| v.as_str()), Some("E_UNKNOWN_SYSCALL"));
    assert_eq!(err.data.get(FRAME_RETRYABLE), Some(&serde_json::Value::Bool(false)));
}

#[test]
fn clients_cannot_inject_server_pushes() {
    let req = Frame::request(SYSCALL_NEW_MESSAGE, Data::new());

    let replies = process_inbound_text(&alice(), Uuid::new_v4(), &inbound(&req));

    assert_eq!(replies[0].status, Status::Error);
}

#[test]
fn non_request_frames_are_ignored() {
    let req = Frame::request(SYSCALL_HEARTBEAT, Data::new());
    let reply = req.done();

    assert!(process_inbound_text(&alice(), Uuid::new_v4(), &inbound(&reply)).is_empty());
}
