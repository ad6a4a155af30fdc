//! GDB/MI output records.
//!
//! Every line gdb writes in MI mode is one record:
//!
//! ```text
//! 12^done,bkpt={number="2",type="breakpoint",addr="0x0000555555555139"}
//! *stopped,reason="breakpoint-hit",thread-id="2",frame={func="worker"}
//! =thread-created,id="3",group-id="i1"
//! ~"process 4242\n"
//! (gdb)
//! ```

/// A value in a result or async record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiValue {
    /// C string constant
    Const(String),
    /// `{name=value,...}`
    Tuple(Vec<(String, MiValue)>),
    /// `[value,...]`; `name=value` items become single-entry tuples
    List(Vec<MiValue>),
}

impl MiValue {
    /// String content of a constant
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Const(s) => Some(s),
            _ => None,
        }
    }

    /// Field of a tuple
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&MiValue> {
        match self {
            Self::Tuple(fields) => lookup(fields, key),
            _ => None,
        }
    }
}

/// Find `key` among `name=value` results
#[must_use]
pub fn lookup<'a>(results: &'a [(String, MiValue)], key: &str) -> Option<&'a MiValue> {
    results.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

/// Result record class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultClass {
    /// `^done`
    Done,
    /// `^running`
    Running,
    /// `^connected`
    Connected,
    /// `^error`
    Error,
    /// `^exit`
    Exit,
}

/// Out-of-band record kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncKind {
    /// `*` execution state change
    Exec,
    /// `+` progress
    Status,
    /// `=` notification
    Notify,
}

/// Stream record kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// `~` console output
    Console,
    /// `@` target output
    Target,
    /// `&` gdb's own log
    Log,
}

/// One line of MI output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiRecord {
    /// Reply to a command
    Result {
        token: Option<u64>,
        class: ResultClass,
        results: Vec<(String, MiValue)>,
    },
    /// Asynchronous notification
    Async {
        token: Option<u64>,
        kind: AsyncKind,
        class: String,
        results: Vec<(String, MiValue)>,
    },
    /// Text output
    Stream { kind: StreamKind, text: String },
    /// `(gdb)` prompt
    Prompt,
    /// Anything that is not MI, e.g. stray inferior output
    Unknown(String),
}

impl MiRecord {
    /// Whether this is `*stopped`
    #[must_use]
    pub fn is_stop(&self) -> bool {
        matches!(self, Self::Async { kind: AsyncKind::Exec, class, .. } if class == "stopped")
    }
}

/// MI syntax error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MiParseError {
    /// Input ended inside a construct
    #[error("unexpected end of record")]
    UnexpectedEnd,

    /// A byte that cannot start or continue the current construct
    #[error("unexpected {found:?} at offset {pos}")]
    Unexpected { pos: usize, found: char },

    /// Unknown result class
    #[error("unknown result class {0:?}")]
    UnknownClass(String),
}

/// Parse one line of MI output
///
/// # Errors
///
/// Returns error if the line starts like an MI record but is malformed
pub fn parse_record(line: &str) -> Result<MiRecord, MiParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim_end() == "(gdb)" {
        return Ok(MiRecord::Prompt);
    }

    let mut p = Parser::new(line);
    let token = p.token();

    match p.peek() {
        Some(b'^') => {
            p.bump();
            let class = match p.identifier() {
                "done" => ResultClass::Done,
                "running" => ResultClass::Running,
                "connected" => ResultClass::Connected,
                "error" => ResultClass::Error,
                "exit" => ResultClass::Exit,
                other => return Err(MiParseError::UnknownClass(other.to_string())),
            };
            let results = p.results()?;
            Ok(MiRecord::Result {
                token,
                class,
                results,
            })
        }
        Some(c @ (b'*' | b'+' | b'=')) => {
            p.bump();
            let kind = match c {
                b'*' => AsyncKind::Exec,
                b'+' => AsyncKind::Status,
                _ => AsyncKind::Notify,
            };
            let class = p.identifier().to_string();
            let results = p.results()?;
            Ok(MiRecord::Async {
                token,
                kind,
                class,
                results,
            })
        }
        Some(c @ (b'~' | b'@' | b'&')) if token.is_none() => {
            p.bump();
            let kind = match c {
                b'~' => StreamKind::Console,
                b'@' => StreamKind::Target,
                _ => StreamKind::Log,
            };
            let text = p.c_string()?;
            Ok(MiRecord::Stream { kind, text })
        }
        _ => Ok(MiRecord::Unknown(line.to_string())),
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn bump(&mut self) {
        self.pos += 1;
    }

    fn expect(&mut self, want: u8) -> Result<(), MiParseError> {
        match self.peek() {
            Some(b) if b == want => {
                self.bump();
                Ok(())
            }
            Some(b) => Err(MiParseError::Unexpected {
                pos: self.pos,
                found: b as char,
            }),
            None => Err(MiParseError::UnexpectedEnd),
        }
    }

    fn token(&mut self) -> Option<u64> {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.bump();
        }
        if start == self.pos {
            None
        } else {
            self.src[start..self.pos].parse().ok()
        }
    }

    fn identifier(&mut self) -> &'a str {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            self.bump();
        }
        &self.src[start..self.pos]
    }

    fn results(&mut self) -> Result<Vec<(String, MiValue)>, MiParseError> {
        let mut out = Vec::new();
        while self.peek() == Some(b',') {
            self.bump();
            out.push(self.result()?);
        }
        match self.peek() {
            None => Ok(out),
            Some(b) => Err(MiParseError::Unexpected {
                pos: self.pos,
                found: b as char,
            }),
        }
    }

    fn result(&mut self) -> Result<(String, MiValue), MiParseError> {
        let name = self.identifier().to_string();
        self.expect(b'=')?;
        let value = self.value()?;
        Ok((name, value))
    }

    fn value(&mut self) -> Result<MiValue, MiParseError> {
        match self.peek() {
            Some(b'"') => Ok(MiValue::Const(self.c_string()?)),
            Some(b'{') => {
                self.bump();
                let mut fields = Vec::new();
                if self.peek() != Some(b'}') {
                    fields.push(self.result()?);
                    while self.peek() == Some(b',') {
                        self.bump();
                        fields.push(self.result()?);
                    }
                }
                self.expect(b'}')?;
                Ok(MiValue::Tuple(fields))
            }
            Some(b'[') => {
                self.bump();
                let mut items = Vec::new();
                if self.peek() != Some(b']') {
                    items.push(self.list_item()?);
                    while self.peek() == Some(b',') {
                        self.bump();
                        items.push(self.list_item()?);
                    }
                }
                self.expect(b']')?;
                Ok(MiValue::List(items))
            }
            Some(b) => Err(MiParseError::Unexpected {
                pos: self.pos,
                found: b as char,
            }),
            None => Err(MiParseError::UnexpectedEnd),
        }
    }

    fn list_item(&mut self) -> Result<MiValue, MiParseError> {
        match self.peek() {
            Some(b'"' | b'{' | b'[') => self.value(),
            _ => {
                let (name, value) = self.result()?;
                Ok(MiValue::Tuple(vec![(name, value)]))
            }
        }
    }

    fn c_string(&mut self) -> Result<String, MiParseError> {
        self.expect(b'"')?;
        let bytes = self.src.as_bytes();
        let mut out = Vec::new();

        loop {
            let b = *bytes.get(self.pos).ok_or(MiParseError::UnexpectedEnd)?;
            self.bump();
            match b {
                b'"' => break,
                b'\\' => {
                    let esc = *bytes.get(self.pos).ok_or(MiParseError::UnexpectedEnd)?;
                    self.bump();
                    match esc {
                        b'n' => out.push(b'\n'),
                        b't' => out.push(b'\t'),
                        b'r' => out.push(b'\r'),
                        b'e' => out.push(0x1b),
                        b'0'..=b'7' => {
                            // Up to three octal digits.
                            let mut value = u32::from(esc - b'0');
                            for _ in 0..2 {
                                match bytes.get(self.pos) {
                                    Some(d @ b'0'..=b'7') => {
                                        value = value * 8 + u32::from(d - b'0');
                                        self.bump();
                                    }
                                    _ => break,
                                }
                            }
                            out.push((value & 0xff) as u8);
                        }
                        other => out.push(other),
                    }
                }
                other => out.push(other),
            }
        }

        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

/// Quote a string as an MI C-string argument
#[must_use]
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn konst(s: &str) -> MiValue {
        MiValue::Const(s.to_string())
    }

    #[test]
    fn test_prompt() {
        assert_eq!(parse_record("(gdb) ").unwrap(), MiRecord::Prompt);
        assert_eq!(parse_record("(gdb)\r\n").unwrap(), MiRecord::Prompt);
    }

    #[test]
    fn test_result_with_token() {
        let record = parse_record(
            r#"12^done,bkpt={number="2",type="breakpoint",addr="0x0000555555555139"}"#,
        )
        .unwrap();
        let MiRecord::Result {
            token,
            class,
            results,
        } = record
        else {
            panic!("expected result record");
        };
        assert_eq!(token, Some(12));
        assert_eq!(class, ResultClass::Done);
        let bkpt = lookup(&results, "bkpt").unwrap();
        assert_eq!(bkpt.get("number"), Some(&konst("2")));
        assert_eq!(bkpt.get("addr").and_then(MiValue::as_str), Some("0x0000555555555139"));
    }

    #[test]
    fn test_error_result() {
        let record = parse_record(r#"7^error,msg="Invalid thread id: 9""#).unwrap();
        assert_eq!(
            record,
            MiRecord::Result {
                token: Some(7),
                class: ResultClass::Error,
                results: vec![("msg".to_string(), konst("Invalid thread id: 9"))],
            }
        );
    }

    #[test]
    fn test_stopped_record() {
        let record = parse_record(
            r#"*stopped,reason="breakpoint-hit",disp="del",bkptno="2",frame={addr="0x0000555555555139",func="worker",args=[{name="arg",value="0x0"}]},thread-id="2",stopped-threads="all",core="1""#,
        )
        .unwrap();
        assert!(record.is_stop());
        let MiRecord::Async { results, .. } = record else {
            panic!("expected async record");
        };
        assert_eq!(lookup(&results, "reason"), Some(&konst("breakpoint-hit")));
        let frame = lookup(&results, "frame").unwrap();
        assert_eq!(frame.get("func"), Some(&konst("worker")));
        let Some(MiValue::List(args)) = frame.get("args") else {
            panic!("expected args list");
        };
        assert_eq!(args[0].get("name"), Some(&konst("arg")));
    }

    #[test]
    fn test_result_list_items() {
        let record = parse_record(r#"^done,groups=[group="a",group="b"],empty=[],t={}"#).unwrap();
        let MiRecord::Result { results, .. } = record else {
            panic!("expected result record");
        };
        let Some(MiValue::List(items)) = lookup(&results, "groups") else {
            panic!("expected list");
        };
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].get("group"), Some(&konst("b")));
        assert_eq!(lookup(&results, "empty"), Some(&MiValue::List(vec![])));
        assert_eq!(lookup(&results, "t"), Some(&MiValue::Tuple(vec![])));
    }

    #[test]
    fn test_notify_and_running() {
        let record = parse_record(r#"=thread-created,id="3",group-id="i1""#).unwrap();
        assert!(matches!(
            record,
            MiRecord::Async { kind: AsyncKind::Notify, ref class, .. } if class == "thread-created"
        ));
        assert!(!record.is_stop());

        let record = parse_record("3^running").unwrap();
        assert!(matches!(
            record,
            MiRecord::Result {
                token: Some(3),
                class: ResultClass::Running,
                ..
            }
        ));
    }

    #[test]
    fn test_stream_escapes() {
        let record = parse_record(r#"~"a\tb \"q\" \\ \101\n""#).unwrap();
        assert_eq!(
            record,
            MiRecord::Stream {
                kind: StreamKind::Console,
                text: "a\tb \"q\" \\ A\n".to_string(),
            }
        );
    }

    #[test]
    fn test_unknown_line() {
        assert_eq!(
            parse_record("hello from inferior").unwrap(),
            MiRecord::Unknown("hello from inferior".to_string())
        );
    }

    #[test]
    fn test_malformed_records() {
        assert_eq!(
            parse_record(r#"^done,msg="unterminated"#),
            Err(MiParseError::UnexpectedEnd)
        );
        assert!(matches!(
            parse_record(r#"^done,a="1"x"#),
            Err(MiParseError::Unexpected { found: 'x', .. })
        ));
        assert_eq!(
            parse_record("^weird"),
            Err(MiParseError::UnknownClass("weird".to_string()))
        );
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("info proc mappings"), "\"info proc mappings\"");
        assert_eq!(quote(r#"set args 'a b' "c""#), r#""set args 'a b' \"c\"""#);
        assert_eq!(quote("x\\y"), r#""x\\y""#);
    }

    proptest::proptest! {
        #[test]
        fn prop_quoted_stream_round_trips(text in "[ -~\t\n]{0,64}") {
            let line = format!("~{}", quote(&text));
            let record = parse_record(&line).unwrap();
            proptest::prop_assert_eq!(
                record,
                MiRecord::Stream { kind: StreamKind::Console, text }
            );
        }
    }
}
