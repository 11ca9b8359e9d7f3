//! Console side of the link.

use carto_link::{Endpoint, LinkConfig, LinkError};
use carto_protocol::{Message, MessageType};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Messages the robot sends to the console.
const ROBOT_MESSAGES: [MessageType; 4] = [
    MessageType::MoveDone,
    MessageType::SetObstaclePosition,
    MessageType::SetRobotPosition,
    MessageType::RobotPositionReceived,
];

/// A link endpoint plus the queue of robot reports it has received.
pub struct Session {
    endpoint: Endpoint,
    reports: mpsc::UnboundedReceiver<Message>,
    timeout: Duration,
}

impl Session {
    pub fn new(config: LinkConfig, timeout: Duration) -> Self {
        let endpoint = Endpoint::new(config);
        let (tx, reports) = mpsc::unbounded_channel();

        for msg_type in ROBOT_MESSAGES {
            let tx = tx.clone();
            endpoint.register_message_handler(msg_type, move |message| {
                tracing::debug!("Robot reported {}", message);
                let _ = tx.send(message);
            });
        }

        Self {
            endpoint,
            reports,
            timeout,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Starts the link and waits for the robot to be reachable.
    pub async fn connect(&mut self) -> Result<(), LinkError> {
        self.endpoint.start().await?;
        self.endpoint.wait_connected(self.timeout).await
    }

    /// Sends `messages` in order and collects reports until `until` arrives.
    ///
    /// With `until` set to `None` nothing is awaited and only reports already
    /// queued are returned.
    pub async fn request(
        &mut self,
        messages: &[Message],
        until: Option<MessageType>,
    ) -> Result<Vec<Message>, LinkError> {
        let mut reports = self.drain();
        for message in messages {
            self.endpoint.send_message_async(message).await?;
        }

        let Some(last) = until else {
            return Ok(reports);
        };

        let deadline = Instant::now() + self.timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.reports.recv()).await {
                Ok(Some(message)) => {
                    reports.push(message);
                    if message.message_type() == last {
                        return Ok(reports);
                    }
                }
                Ok(None) => return Err(LinkError::QueueClosed),
                Err(_) => return Err(LinkError::Timeout),
            }
        }
    }

    /// Waits for the next report, if any arrives within the timeout.
    pub async fn next_report(&mut self, timeout: Duration) -> Option<Message> {
        tokio::time::timeout(timeout, self.reports.recv())
            .await
            .ok()
            .flatten()
    }

    /// Returns every report received so far.
    pub fn drain(&mut self) -> Vec<Message> {
        let mut reports = Vec::new();
        while let Ok(message) = self.reports.try_recv() {
            reports.push(message);
        }
        reports
    }

    pub async fn close(&mut self) {
        self.endpoint.stop().await;
    }
}
