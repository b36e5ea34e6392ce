/// Capital.com session key prefix
const CAPITAL_SESSION_PREFIX: &str = "capital:session:";

pub fn capital_session_key(username: &str) -> String {
    format!("{}{}", CAPITAL_SESSION_PREFIX, username)
}
