//! Scripted chat model for integration testing.
//!
//! Analysis calls (JSON requests from the prompt runner) pop queued
//! replies in order; once the queue is empty they get an empty
//! `{"related": []}`. Judge calls can be forced to fail. Free-text calls
//! (prompt mutation) all get the same configurable reply. Every request
//! is recorded for inspection.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use relation_optimizer::llm::{ChatModel, ChatRequest};

const JUDGE_SYSTEM_PREFIX: &str = "You are a prediction market analyst evaluating";

pub struct ScriptedModel {
    analysis: Mutex<VecDeque<String>>,
    repeat_last: bool,
    last_analysis: Mutex<Option<String>>,
    text_reply: String,
    fail_judge: bool,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    /// Replies are served once each, in order.
    pub fn new(analysis: Vec<String>) -> Self {
        Self {
            analysis: Mutex::new(analysis.into()),
            repeat_last: false,
            last_analysis: Mutex::new(None),
            text_reply: "Be more careful.".to_string(),
            fail_judge: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every analysis call gets `reply`.
    pub fn repeating(reply: String) -> Self {
        Self {
            repeat_last: true,
            ..Self::new(vec![reply])
        }
    }

    pub fn with_text_reply(mut self, reply: &str) -> Self {
        self.text_reply = reply.to_string();
        self
    }

    pub fn failing_judge(mut self) -> Self {
        self.fail_judge = true;
        self
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn analysis_requests(&self) -> Vec<ChatRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.json_response && !is_judge(r))
            .collect()
    }

    pub fn judge_calls(&self) -> usize {
        self.requests().iter().filter(|r| is_judge(r)).count()
    }

    pub fn text_calls(&self) -> usize {
        self.requests().iter().filter(|r| !r.json_response).count()
    }
}

fn is_judge(req: &ChatRequest) -> bool {
    req.json_response && req.system.starts_with(JUDGE_SYSTEM_PREFIX)
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());

        if is_judge(request) {
            return if self.fail_judge {
                Err(anyhow!("judge unavailable"))
            } else {
                Err(anyhow!("judge not scripted"))
            };
        }

        if !request.json_response {
            return Ok(self.text_reply.clone());
        }

        let next = self.analysis.lock().unwrap().pop_front();
        match next {
            Some(reply) => {
                *self.last_analysis.lock().unwrap() = Some(reply.clone());
                Ok(reply)
            }
            None if self.repeat_last => Ok(self
                .last_analysis
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| r#"{"related": []}"#.to_string())),
            None => Ok(r#"{"related": []}"#.to_string()),
        }
    }
}

/// `{"related": [...]}` with one entry per `(market_id, label)`.
pub fn related(entries: &[(&str, &str)]) -> String {
    let items: Vec<String> = entries
        .iter()
        .map(|(id, rel)| {
            format!(r#"{{"marketId": "{id}", "relationship": "{rel}", "reasoning": "scripted"}}"#)
        })
        .collect();
    format!(r#"{{"related": [{}]}}"#, items.join(", "))
}
