//! Message formatting utilities for terminal display.

use tsunagi_realtime::{
    MetricsSnapshot,
    domain::{ConnectionChange, ConnectionState, Message, TypingEvent},
};
use tsunagi_shared::time::format_clock_time;

/// Message formatter for client display
pub struct MessageFormatter;

impl MessageFormatter {
    /// Format an inbound chat message
    ///
    /// # Arguments
    ///
    /// * `message` - The message received through realtime
    ///
    /// # Returns
    ///
    /// A formatted string with sender, time and content
    pub fn format_message(message: &Message) -> String {
        format!(
            "\n\n------------------------------------------------------------\n\
             @{} ({}): {}\n\
             sent at {}\n\
             ------------------------------------------------------------\n",
            message.sender_name,
            message.sender_type,
            message.content,
            format_clock_time(message.created_at)
        )
    }

    /// Format a typing indicator from another participant
    ///
    /// # Arguments
    ///
    /// * `typing` - The typing event
    ///
    /// # Returns
    ///
    /// `None` when the event only reports that typing stopped
    pub fn format_typing(typing: &TypingEvent) -> Option<String> {
        typing
            .is_typing
            .then(|| format!("\n… {} is typing\n", typing.sender_type))
    }

    /// Format a connection change for the status line
    pub fn format_connection(change: &ConnectionChange) -> String {
        if change.connected {
            format!("\n● {}\n", change.status)
        } else {
            format!("\n○ {}\n", change.status)
        }
    }

    /// Format a confirmation after the server stored a sent message
    ///
    /// # Arguments
    ///
    /// * `message` - The confirmed message returned by the API
    pub fn format_sent_confirmation(message: &Message) -> String {
        format!(
            "sent at {} ({})\n",
            format_clock_time(message.created_at),
            message.status.as_str()
        )
    }

    /// Format a send failure for the given content
    pub fn format_failed(content: &str, error: &str) -> String {
        format!("✗ not sent: \"{}\" ({})\n", content, error)
    }

    /// Format the `/status` output
    ///
    /// # Arguments
    ///
    /// * `state` - Current state machine state
    /// * `status` - Human-readable status line
    /// * `metrics` - Connection metrics snapshot
    pub fn format_status(state: ConnectionState, status: &str, metrics: &MetricsSnapshot) -> String {
        let mut output = String::new();
        output.push_str("\n============================================================\n");
        output.push_str(&format!("State: {} ({})\n", state, status));
        output.push_str(&format!(
            "Attempts: {} | succeeded: {} | failed: {}\n",
            metrics.connection_attempts, metrics.successful_connections, metrics.failed_connections
        ));
        output.push_str(&format!(
            "Average connect time: {:.0}ms | retries: {}\n",
            metrics.average_connection_time_ms, metrics.retry_count
        ));
        if metrics.fallback_activated {
            output.push_str("Fallback has been activated\n");
        }
        if let Some(error) = &metrics.last_error {
            output.push_str(&format!("Last error: {}\n", error));
        }
        output.push_str("============================================================\n");
        output
    }
}
