//! The conversation tool vocabulary agents can call during a turn.
//!
//! Each tool has a JSON schema (for the provider to advertise) and a
//! processor that validates the call and pushes effects into the
//! [`ToolContext`]. Invalid calls are rejected with a warning and produce no
//! effect - the event log must never contain orphaned references.

use anyhow::{anyhow, bail, Result};
use serde_json::{json, Value};
use tracing::warn;

use hollowbrook_domain::{AgentName, ConversationId, Effect, Privacy};

use crate::interpreter::resolve_destination;
use crate::provider::ToolContext;

#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

type Processor = fn(&Value, &ToolContext) -> Result<()>;

pub struct ConversationTool {
    pub spec: ToolSpec,
    processor: Processor,
}

fn str_arg(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

fn required_str(args: &Value, key: &str) -> Result<String> {
    str_arg(args, key).ok_or_else(|| anyhow!("missing required argument '{key}'"))
}

fn invite(args: &Value, ctx: &ToolContext) -> Result<()> {
    let invitee = AgentName::from(required_str(args, "invitee")?.as_str());
    if invitee == ctx.agent {
        bail!("cannot invite yourself");
    }
    if !ctx.known_agents.contains(&invitee) {
        bail!("unknown agent '{invitee}'");
    }
    let privacy = match str_arg(args, "privacy").as_deref() {
        Some("public") => Privacy::Public,
        Some("private") | None => Privacy::Private,
        Some(other) => bail!("unknown privacy '{other}'"),
    };
    ctx.push_effect(Effect::InviteToConversation {
        inviter: ctx.agent.clone(),
        invitee,
        location: ctx.location.clone(),
        privacy,
        topic: str_arg(args, "topic"),
    });
    Ok(())
}

fn accept(args: &Value, ctx: &ToolContext) -> Result<()> {
    let invite = ctx
        .pending_invite
        .as_ref()
        .ok_or_else(|| anyhow!("no pending invitation to accept"))?;
    ctx.push_effect(Effect::AcceptInvite {
        agent: ctx.agent.clone(),
        conversation_id: invite.conversation_id.clone(),
        first_message: str_arg(args, "first_message"),
    });
    Ok(())
}

fn decline(_args: &Value, ctx: &ToolContext) -> Result<()> {
    let invite = ctx
        .pending_invite
        .as_ref()
        .ok_or_else(|| anyhow!("no pending invitation to decline"))?;
    ctx.push_effect(Effect::DeclineInvite {
        agent: ctx.agent.clone(),
        conversation_id: invite.conversation_id.clone(),
    });
    Ok(())
}

fn join(args: &Value, ctx: &ToolContext) -> Result<()> {
    let conversation_id = ConversationId::from(required_str(args, "conversation_id")?.as_str());
    ctx.push_effect(Effect::JoinConversation {
        agent: ctx.agent.clone(),
        conversation_id,
        first_message: str_arg(args, "first_message"),
    });
    Ok(())
}

fn leave(args: &Value, ctx: &ToolContext) -> Result<()> {
    let conversation_id = ctx
        .conversation_id
        .clone()
        .ok_or_else(|| anyhow!("not currently in a conversation"))?;
    ctx.push_effect(Effect::LeaveConversation {
        agent: ctx.agent.clone(),
        conversation_id,
        last_message: str_arg(args, "last_message"),
    });
    Ok(())
}

fn move_conversation(args: &Value, ctx: &ToolContext) -> Result<()> {
    let conversation_id = ctx
        .conversation_id
        .clone()
        .ok_or_else(|| anyhow!("not currently in a conversation"))?;
    let raw = required_str(args, "destination")?;
    let to_location = resolve_destination(&raw, &ctx.known_locations)
        .ok_or_else(|| anyhow!("unknown destination '{raw}'"))?;
    ctx.push_effect(Effect::MoveConversation {
        agent: ctx.agent.clone(),
        conversation_id,
        to_location,
    });
    Ok(())
}

fn acknowledge_ending(args: &Value, ctx: &ToolContext) -> Result<()> {
    let conversation_id = ConversationId::from(required_str(args, "conversation_id")?.as_str());
    ctx.push_effect(Effect::ConversationEndingSeen {
        agent: ctx.agent.clone(),
        conversation_id,
    });
    Ok(())
}

/// The full conversation tool registry, in the order advertised to models.
pub fn conversation_tools() -> Vec<ConversationTool> {
    vec![
        ConversationTool {
            spec: ToolSpec {
                name: "invite_to_conversation",
                description: "Invite another agent at your location to a conversation.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "invitee": {"type": "string", "description": "Name of the agent to invite"},
                        "privacy": {"type": "string", "enum": ["public", "private"]},
                        "topic": {"type": "string"}
                    },
                    "required": ["invitee"]
                }),
            },
            processor: invite,
        },
        ConversationTool {
            spec: ToolSpec {
                name: "accept_invite",
                description: "Accept your pending conversation invitation.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "first_message": {"type": "string", "description": "What you say as you join"}
                    }
                }),
            },
            processor: accept,
        },
        ConversationTool {
            spec: ToolSpec {
                name: "decline_invite",
                description: "Decline your pending conversation invitation.",
                input_schema: json!({"type": "object", "properties": {}}),
            },
            processor: decline,
        },
        ConversationTool {
            spec: ToolSpec {
                name: "join_conversation",
                description: "Join a public conversation at your location.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "conversation_id": {"type": "string"},
                        "first_message": {"type": "string"}
                    },
                    "required": ["conversation_id"]
                }),
            },
            processor: join,
        },
        ConversationTool {
            spec: ToolSpec {
                name: "leave_conversation",
                description: "Leave your current conversation.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "last_message": {"type": "string", "description": "Parting words, if any"}
                    }
                }),
            },
            processor: leave,
        },
        ConversationTool {
            spec: ToolSpec {
                name: "move_conversation",
                description: "Move your whole conversation to a connected location.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "destination": {"type": "string"}
                    },
                    "required": ["destination"]
                }),
            },
            processor: move_conversation,
        },
        ConversationTool {
            spec: ToolSpec {
                name: "acknowledge_ending",
                description: "Acknowledge that a conversation you were in has ended.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "conversation_id": {"type": "string"}
                    },
                    "required": ["conversation_id"]
                }),
            },
            processor: acknowledge_ending,
        },
    ]
}

/// Execute one tool call against the context. Failures are logged and
/// swallowed: a bad call produces no effect, never a broken event log.
pub fn dispatch_tool(name: &str, args: &Value, ctx: &ToolContext) -> bool {
    let tools = conversation_tools();
    let Some(tool) = tools.iter().find(|tool| tool.spec.name == name) else {
        warn!(tool = name, agent = %ctx.agent, "unknown tool call ignored");
        return false;
    };
    match (tool.processor)(args, ctx) {
        Ok(()) => {
            ctx.record_tool(name);
            true
        }
        Err(err) => {
            warn!(tool = name, agent = %ctx.agent, error = %err, "tool call rejected");
            false
        }
    }
}
