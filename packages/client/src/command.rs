//! Input parsing for the client prompt.
//!
//! Pure functions without side effects, so they are easy to test.

use tsunagi_realtime::domain::ConversationId;

/// What the visitor asked for on one input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Plain text to send as a message
    Message(String),
    /// `/conversation <id>`: switch to another conversation
    SwitchConversation(ConversationId),
    /// `/status`: print connection state and metrics
    Status,
    /// `/quit`
    Quit,
    /// A slash command that could not be understood
    Invalid(String),
}

/// Parse a trimmed, non-empty input line.
pub fn parse_input(line: &str) -> Input {
    let Some(command) = line.strip_prefix('/') else {
        return Input::Message(line.to_string());
    };

    let mut parts = command.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some("conversation" | "c"), Some(id), None) => match ConversationId::new(id) {
            Ok(id) => Input::SwitchConversation(id),
            Err(e) => Input::Invalid(e.to_string()),
        },
        (Some("conversation" | "c"), _, _) => {
            Input::Invalid("usage: /conversation <id>".to_string())
        }
        (Some("status"), None, None) => Input::Status,
        (Some("quit" | "exit"), None, None) => Input::Quit,
        _ => Input::Invalid(format!("unknown command '{}'", line)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_a_message() {
        // テスト項目: スラッシュで始まらない入力はメッセージとして扱われる
        // given (前提条件):
        let line = "Hello, I need help with my order";

        // when (操作):
        let result = parse_input(line);

        // then (期待する結果):
        assert_eq!(result, Input::Message(line.to_string()));
    }

    #[test]
    fn test_conversation_command_switches() {
        // テスト項目: /conversation <id> で会話の切り替えになる
        // given (前提条件):
        let line = "/conversation C2";

        // when (操作):
        let result = parse_input(line);

        // then (期待する結果):
        assert_eq!(
            result,
            Input::SwitchConversation(ConversationId::new("C2").unwrap())
        );
    }

    #[test]
    fn test_conversation_command_short_form() {
        // テスト項目: /c は /conversation の短縮形として扱われる
        // given (前提条件):
        let line = "/c C3";

        // when (操作):
        let result = parse_input(line);

        // then (期待する結果):
        assert_eq!(
            result,
            Input::SwitchConversation(ConversationId::new("C3").unwrap())
        );
    }

    #[test]
    fn test_conversation_command_without_id_is_invalid() {
        // テスト項目: ID のない /conversation は使い方のエラーになる
        // given (前提条件):
        let line = "/conversation";

        // when (操作):
        let result = parse_input(line);

        // then (期待する結果):
        assert_eq!(
            result,
            Input::Invalid("usage: /conversation <id>".to_string())
        );
    }

    #[test]
    fn test_conversation_command_rejects_colon() {
        // テスト項目: チャンネル名を壊す ':' を含む ID は拒否される
        // given (前提条件):
        let line = "/conversation a:b";

        // when (操作):
        let result = parse_input(line);

        // then (期待する結果):
        assert!(matches!(result, Input::Invalid(_)));
    }

    #[test]
    fn test_status_and_quit() {
        // テスト項目: /status と /quit（/exit）が認識される
        // given (前提条件):
        let lines = ["/status", "/quit", "/exit"];

        // when (操作):
        let results: Vec<Input> = lines.iter().map(|line| parse_input(line)).collect();

        // then (期待する結果):
        assert_eq!(results, vec![Input::Status, Input::Quit, Input::Quit]);
    }

    #[test]
    fn test_unknown_command_is_invalid() {
        // テスト項目: 未知のコマンドはエラーとして扱われる
        // given (前提条件):
        let line = "/dance";

        // when (操作):
        let result = parse_input(line);

        // then (期待する結果):
        assert_eq!(result, Input::Invalid("unknown command '/dance'".to_string()));
    }
}
