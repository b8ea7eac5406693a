//! Standard guard conditions script authors reach for constantly.

use async_trait::async_trait;

use prompter_core::Message;

use crate::context::Context;
use crate::script::functions::{Condition, ConditionFn};

struct ExactMatch(Message);

#[async_trait]
impl ConditionFn for ExactMatch {
    async fn check(&self, ctx: &Context) -> anyhow::Result<bool> {
        Ok(ctx.last_request().map(|request| request == &self.0)?)
    }
}

/// True when the last request equals the given message exactly.
pub fn exact_match(message: impl Into<Message>) -> Condition {
    Condition::custom(ExactMatch(message.into()))
}

struct HasText(String);

#[async_trait]
impl ConditionFn for HasText {
    async fn check(&self, ctx: &Context) -> anyhow::Result<bool> {
        let request = ctx.last_request()?;
        Ok(request
            .text
            .as_deref()
            .is_some_and(|text| text.contains(&self.0)))
    }
}

/// True when the last request's text contains the given substring.
pub fn has_text(substring: impl Into<String>) -> Condition {
    Condition::custom(HasText(substring.into()))
}

struct AnyOf(Vec<Condition>);

#[async_trait]
impl ConditionFn for AnyOf {
    async fn check(&self, ctx: &Context) -> anyhow::Result<bool> {
        for condition in &self.0 {
            if condition.evaluate(ctx).await {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// True when at least one inner condition holds.
pub fn any(conditions: Vec<Condition>) -> Condition {
    Condition::custom(AnyOf(conditions))
}

struct AllOf(Vec<Condition>);

#[async_trait]
impl ConditionFn for AllOf {
    async fn check(&self, ctx: &Context) -> anyhow::Result<bool> {
        for condition in &self.0 {
            if !condition.evaluate(ctx).await {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// True when every inner condition holds.
pub fn all(conditions: Vec<Condition>) -> Condition {
    Condition::custom(AllOf(conditions))
}

struct Negation(Condition);

#[async_trait]
impl ConditionFn for Negation {
    async fn check(&self, ctx: &Context) -> anyhow::Result<bool> {
        Ok(!self.0.evaluate(ctx).await)
    }
}

/// Inverts a condition. Note an inner evaluation failure counts as false
/// and therefore negates to true.
pub fn negation(condition: Condition) -> Condition {
    Condition::custom(Negation(condition))
}
