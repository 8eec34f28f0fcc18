// src/core/worker.rs

//! Binds the operator handlers to the request/response transport.
//!
//! The transport delivers one MessagePack-encoded argument per event and
//! expects one MessagePack-encodable value back. An uncaught handler error
//! is wrapped as `{"Balancer error": <message>}` and still counts as a
//! successful response.

use rmpv::Value;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::core::MastermindError;
use crate::core::balancer::Balancer;
use crate::core::namespaces::NamespaceSettings;
use crate::core::topology::{CoupleId, DEFAULT_NAMESPACE, GroupId};
use crate::core::updater::NodeInfoUpdater;

/// The stable set of events this coordinator answers.
pub const HANDLERS: &[&str] = &[
    "get_groups",
    "get_symmetric_groups",
    "get_bad_groups",
    "get_frozen_groups",
    "get_closed_groups",
    "get_empty_groups",
    "get_group_info",
    "get_group_history",
    "get_group_weights",
    "get_couple_info",
    "groups_by_dc",
    "couples_by_namespace",
    "couple_groups",
    "break_couple",
    "repair_groups",
    "freeze_couple",
    "unfreeze_couple",
    "get_namespaces",
    "get_namespace_settings",
    "get_namespaces_settings",
    "namespace_setup",
    "get_next_group_number",
    "group_detach_node",
    "force_nodes_update",
];

pub struct Worker {
    balancer: Arc<Balancer>,
    updater: Arc<NodeInfoUpdater>,
}

impl Worker {
    pub fn new(balancer: Arc<Balancer>, updater: Arc<NodeInfoUpdater>) -> Self {
        for handler in HANDLERS {
            info!("registering handler for event {handler}");
        }
        Worker { balancer, updater }
    }

    /// Decodes the request, runs the handler and encodes the reply. Errors
    /// become the error envelope; the response itself never fails.
    pub async fn dispatch(&self, event: &str, payload: &[u8]) -> Vec<u8> {
        let args = if payload.is_empty() {
            Value::Nil
        } else {
            rmpv::decode::read_value(&mut &payload[..]).unwrap_or(Value::Nil)
        };
        info!("running handler for event {event}");

        let reply = match self.handle(event, &args).await {
            Ok(value) => value,
            Err(e) => {
                error!("Balancer error: {e}");
                Value::Map(vec![(
                    Value::from("Balancer error"),
                    Value::from(e.to_string()),
                )])
            }
        };

        let mut buf = Vec::new();
        if let Err(e) = rmpv::encode::write_value(&mut buf, &reply) {
            error!("failed to encode response for event {event}: {e}");
        }
        buf
    }

    async fn handle(&self, event: &str, args: &Value) -> Result<Value, MastermindError> {
        match event {
            "get_groups" => to_value(self.balancer.get_groups()),
            "get_symmetric_groups" => to_value(self.balancer.get_symmetric_groups()),
            "get_bad_groups" => to_value(self.balancer.get_bad_groups()),
            "get_frozen_groups" => to_value(self.balancer.get_frozen_groups()),
            "get_closed_groups" => to_value(self.balancer.get_closed_groups()),
            "get_empty_groups" => to_value(self.balancer.get_empty_groups()),
            "get_group_info" => {
                let group_id = group_id_arg(args, 0)?;
                to_value(self.balancer.get_group_info(group_id)?)
            }
            "get_group_history" => {
                let group_id = group_id_arg(args, 0)?;
                to_value(self.balancer.get_group_history(group_id)?)
            }
            "get_group_weights" => to_value(self.balancer.get_group_weights()),
            "get_couple_info" => {
                let id = self.couple_id_arg(args, 0)?;
                to_value(self.balancer.get_couple_info(&id)?)
            }
            "groups_by_dc" => to_value(self.balancer.groups_by_dc()),
            "couples_by_namespace" => {
                let namespace = str_arg(args, 0)?;
                to_value(self.balancer.couples_by_namespace(&namespace))
            }
            "couple_groups" => {
                let size = group_id_arg(args, 0)? as usize;
                let mandatory = match arg(args, 1) {
                    Some(value) => id_list(value)?,
                    None => Vec::new(),
                };
                let namespace = match arg(args, 2) {
                    Some(value) => value
                        .as_str()
                        .map(str::to_string)
                        .ok_or_else(|| invalid("namespace must be a string"))?,
                    None => DEFAULT_NAMESPACE.to_string(),
                };
                to_value(
                    self.balancer
                        .couple_groups(size, mandatory, &namespace)
                        .await?,
                )
            }
            "break_couple" => {
                let ids = id_list(arg(args, 0).ok_or_else(|| invalid("missing couple"))?)?;
                let confirmation = str_arg(args, 1).unwrap_or_default();
                let force = arg(args, 2).and_then(Value::as_bool).unwrap_or(false);
                to_value(self.balancer.break_couple(ids, &confirmation, force).await?)
            }
            "repair_groups" => {
                let group_id = group_id_arg(args, 0)?;
                let force_namespace = arg(args, 1)
                    .and_then(Value::as_str)
                    .map(str::to_string);
                to_value(
                    self.balancer
                        .repair_groups(group_id, force_namespace)
                        .await?,
                )
            }
            "freeze_couple" => {
                let id = self.couple_id_arg(args, 0)?;
                to_value(self.balancer.freeze_couple(&id).await?)
            }
            "unfreeze_couple" => {
                let id = self.couple_id_arg(args, 0)?;
                to_value(self.balancer.unfreeze_couple(&id).await?)
            }
            "get_namespaces" => to_value(self.balancer.get_namespaces().await?),
            "get_namespace_settings" => {
                let namespace = str_arg(args, 0)?;
                to_value(self.balancer.get_namespace_settings(&namespace).await?)
            }
            "get_namespaces_settings" => {
                to_value(self.balancer.get_namespaces_settings().await?)
            }
            "namespace_setup" => {
                let value = arg(args, 0)
                    .cloned()
                    .ok_or_else(|| invalid("missing namespace settings"))?;
                let settings: NamespaceSettings = rmpv::ext::from_value(value)
                    .map_err(|e| invalid(format!("malformed namespace settings: {e}")))?;
                to_value(self.balancer.namespace_setup(settings).await?)
            }
            "get_next_group_number" => {
                let count = arg(args, 0)
                    .and_then(Value::as_i64)
                    .ok_or_else(|| invalid("missing groups count"))?;
                to_value(self.balancer.get_next_group_number(count).await?)
            }
            "group_detach_node" => {
                let group_id = group_id_arg(args, 0)?;
                let node = str_arg(args, 1)?;
                to_value(self.balancer.group_detach_node(group_id, &node)?)
            }
            "force_nodes_update" => to_value(self.updater.clone().force_nodes_update()),
            other => Err(invalid(format!("unknown event '{other}'"))),
        }
    }

    /// A couple argument may arrive as the `12:34:56` string, the id list,
    /// or a single member group id.
    fn couple_id_arg(&self, args: &Value, idx: usize) -> Result<CoupleId, MastermindError> {
        let value = arg(args, idx).ok_or_else(|| invalid("missing couple"))?;
        match value {
            Value::String(_) => value
                .as_str()
                .ok_or_else(|| invalid("malformed couple id"))?
                .parse(),
            Value::Array(_) => Ok(CoupleId::new(id_list(value)?)),
            _ => {
                let group_id = value
                    .as_u64()
                    .ok_or_else(|| invalid("malformed couple id"))?
                    as GroupId;
                self.balancer.couple_of_group(group_id)
            }
        }
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value, MastermindError> {
    rmpv::ext::to_value(value).map_err(|e| MastermindError::Internal(e.to_string()))
}

fn invalid(msg: impl Into<String>) -> MastermindError {
    MastermindError::precondition(msg.into())
}

/// Positional argument access. A scalar request counts as its own first
/// argument, matching how single-value requests arrive on the wire.
fn arg(args: &Value, idx: usize) -> Option<&Value> {
    match args {
        Value::Array(items) => items.get(idx),
        Value::Nil => None,
        _ if idx == 0 => Some(args),
        _ => None,
    }
}

fn group_id_arg(args: &Value, idx: usize) -> Result<GroupId, MastermindError> {
    let value = arg(args, idx).ok_or_else(|| invalid("missing group id"))?;
    value
        .as_u64()
        .map(|id| id as GroupId)
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .ok_or_else(|| invalid("malformed group id"))
}

fn str_arg(args: &Value, idx: usize) -> Result<String, MastermindError> {
    arg(args, idx)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| invalid("missing string argument"))
}

/// A list of group ids, tolerating both integer and string elements.
fn id_list(value: &Value) -> Result<Vec<GroupId>, MastermindError> {
    let Value::Array(items) = value else {
        return Err(invalid("expected a list of group ids"));
    };
    items
        .iter()
        .map(|item| {
            item.as_u64()
                .map(|id| id as GroupId)
                .or_else(|| item.as_str().and_then(|s| s.trim().parse().ok()))
                .ok_or_else(|| invalid(format!("malformed group id '{item}'")))
        })
        .collect()
}
