// Message Codec
// Versioned JSON envelope around a Task

use crate::domain::Task;
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};

/// Current envelope version
pub const ENVELOPE_VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    v: u32,
    task: &'a Task,
}

#[derive(Deserialize)]
struct Header {
    v: u32,
}

#[derive(Deserialize)]
struct Envelope {
    task: Task,
}

/// Encode a task for the broker
///
/// # Errors
/// - AppError::Validation if the task would not survive the wire (empty ids, NaN, ...)
pub fn encode(task: &Task) -> Result<Vec<u8>> {
    task.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    Ok(serde_json::to_vec(&EnvelopeRef {
        v: ENVELOPE_VERSION,
        task,
    })?)
}

/// Decode broker bytes into a task
///
/// # Errors
/// - AppError::MalformedMessage for anything that is not a well-formed task
pub fn decode(bytes: &[u8]) -> Result<Task> {
    let header: Header = serde_json::from_slice(bytes)
        .map_err(|e| AppError::MalformedMessage(format!("invalid envelope: {}", e)))?;
    if header.v != ENVELOPE_VERSION {
        return Err(AppError::MalformedMessage(format!(
            "unsupported envelope version {} (expected {})",
            header.v, ENVELOPE_VERSION
        )));
    }

    let envelope: Envelope = serde_json::from_slice(bytes)
        .map_err(|e| AppError::MalformedMessage(format!("invalid task: {}", e)))?;
    envelope
        .task
        .validate()
        .map_err(|e| AppError::MalformedMessage(e.to_string()))?;
    Ok(envelope.task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ArgValue, TaskArgs};
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn sample() -> Task {
        let mut task = Task::new(
            "0b8e6c1e-3f0e-4d8a-9a57-1f2b3c4d5e6f",
            1_700_000_000_000,
            "emails",
            "send_welcome",
            TaskArgs::positional(["user@example.com"]).with_kwarg("retries", 2),
        );
        task.ttl_ms = Some(60_000);
        task
    }

    #[test]
    fn test_roundtrip_sample() {
        let task = sample();
        let bytes = encode(&task).unwrap();
        assert_eq!(decode(&bytes).unwrap(), task);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode(b"not json").unwrap_err();
        assert!(matches!(err, AppError::MalformedMessage(_)));
    }

    #[test]
    fn test_decode_rejects_unknown_version() {
        let mut value: serde_json::Value = serde_json::from_slice(&encode(&sample()).unwrap()).unwrap();
        value["v"] = serde_json::json!(99);
        let err = decode(&serde_json::to_vec(&value).unwrap()).unwrap_err();
        assert!(err.to_string().contains("version 99"));
    }

    #[test]
    fn test_decode_rejects_missing_function() {
        let mut value: serde_json::Value = serde_json::from_slice(&encode(&sample()).unwrap()).unwrap();
        value["task"]["function"] = serde_json::json!("");
        assert!(matches!(
            decode(&serde_json::to_vec(&value).unwrap()),
            Err(AppError::MalformedMessage(_))
        ));

        value["task"].as_object_mut().unwrap().remove("function");
        assert!(matches!(
            decode(&serde_json::to_vec(&value).unwrap()),
            Err(AppError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_decode_rejects_pre_epoch_timestamps() {
        let mut value: serde_json::Value = serde_json::from_slice(&encode(&sample()).unwrap()).unwrap();
        value["task"]["enqueued_at"] = serde_json::json!(i64::MIN);
        assert!(matches!(
            decode(&serde_json::to_vec(&value).unwrap()),
            Err(AppError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_pipeline_survives_the_wire() {
        let mut head = sample();
        let mut next = sample();
        next.id = "step-2".to_string();
        next.pipe_ignore = true;
        next.priority = 7;
        head.pipe_target = Some(Box::new(next));

        let decoded = decode(&encode(&head).unwrap()).unwrap();
        assert_eq!(decoded, head);
        assert_eq!(decoded.successors().count(), 1);
    }

    #[test]
    fn test_decode_accepts_envelope_without_newer_fields() {
        let mut value: serde_json::Value = serde_json::from_slice(&encode(&sample()).unwrap()).unwrap();
        let task = value["task"].as_object_mut().unwrap();
        task.remove("priority");
        task.remove("pipe_ignore");
        let decoded = decode(&serde_json::to_vec(&value).unwrap()).unwrap();
        assert_eq!(decoded.priority, 0);
        assert!(decoded.pipe_target.is_none());
    }

    #[test]
    fn test_decode_rejects_untagged_args() {
        let mut value: serde_json::Value = serde_json::from_slice(&encode(&sample()).unwrap()).unwrap();
        value["task"]["args"]["args"] = serde_json::json!(["raw string"]);
        assert!(matches!(
            decode(&serde_json::to_vec(&value).unwrap()),
            Err(AppError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_decode_rejects_retry_overflow() {
        let mut value: serde_json::Value = serde_json::from_slice(&encode(&sample()).unwrap()).unwrap();
        value["task"]["retry_count"] = serde_json::json!(5);
        value["task"]["max_retries"] = serde_json::json!(3);
        assert!(decode(&serde_json::to_vec(&value).unwrap()).is_err());
    }

    #[test]
    fn test_encode_rejects_nan() {
        let mut task = sample();
        task.args = TaskArgs::new().with_arg(f64::NAN);
        assert!(matches!(encode(&task), Err(AppError::Validation(_))));
    }

    fn arb_value() -> impl Strategy<Value = ArgValue> {
        let leaf = prop_oneof![
            Just(ArgValue::Null),
            any::<bool>().prop_map(ArgValue::Bool),
            any::<i64>().prop_map(ArgValue::Int),
            (-1.0e12f64..1.0e12).prop_map(ArgValue::Float),
            ".{0,16}".prop_map(ArgValue::Str),
        ];
        leaf.prop_recursive(4, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(ArgValue::List),
                prop::collection::btree_map("[a-z]{1,8}", inner, 0..4).prop_map(ArgValue::Map),
            ]
        })
    }

    prop_compose! {
        fn arb_task()(
            id in "[a-f0-9-]{1,36}",
            function in "[a-z_][a-z0-9_.]{0,30}",
            queue in "[A-Za-z0-9_.-]{1,64}",
            enqueued_at in 0i64..4_000_000_000_000,
            (max_retries, retry_count) in (0u32..10).prop_flat_map(|m| (Just(m), 0..=m)),
            ttl_ms in proptest::option::of(1i64..86_400_000),
            eta in proptest::option::of(0i64..4_000_000_000_000),
            time_limit_ms in proptest::option::of(1i64..3_600_000),
            store_result in any::<bool>(),
            priority in any::<u8>(),
            pipe_ignore in any::<bool>(),
            args in prop::collection::vec(arb_value(), 0..4),
            kwargs in prop::collection::btree_map("[a-z_]{1,10}", arb_value(), 0..4),
        ) -> Task {
            Task {
                id,
                function,
                args: TaskArgs { args, kwargs: kwargs.into_iter().collect::<BTreeMap<_, _>>() },
                queue,
                enqueued_at,
                retry_count,
                max_retries,
                ttl_ms,
                eta,
                time_limit_ms,
                store_result,
                priority,
                pipe_ignore,
                pipe_target: None,
            }
        }
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(task in arb_task()) {
            let bytes = encode(&task).unwrap();
            prop_assert_eq!(decode(&bytes).unwrap(), task);
        }
    }
}
