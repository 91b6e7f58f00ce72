use nom::branch::alt;
use nom::bytes::complete::{is_not, tag, take_while_m_n, take_while1};
use nom::character::complete::{anychar, char, line_ending, one_of, u64 as dec_u64};
use nom::combinator::{map, opt};
use nom::error::{Error, ErrorKind};
use nom::multi::{many0, separated_list0};
use nom::sequence::{delimited, preceded};
use nom::{IResult, Parser};
use serde_json::{Map, Value};
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultClass {
    Done,
    Running,
    Connected,
    Error,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakPointEvent {
    Created,
    Deleted,
    Modified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadEvent {
    Created,
    GroupStarted,
    Exited,
    GroupExited,
    Selected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsyncClass {
    Running,
    Stopped,
    CmdParamChanged,
    LibraryLoaded,
    Thread(ThreadEvent),
    BreakPoint(BreakPointEvent),
    Other(String),
}

impl AsyncClass {
    fn from_wire(word: &str) -> AsyncClass {
        match word {
            "running" => AsyncClass::Running,
            "stopped" => AsyncClass::Stopped,
            "cmd-param-changed" => AsyncClass::CmdParamChanged,
            "library-loaded" => AsyncClass::LibraryLoaded,
            "thread-created" => AsyncClass::Thread(ThreadEvent::Created),
            "thread-group-started" => AsyncClass::Thread(ThreadEvent::GroupStarted),
            "thread-exited" => AsyncClass::Thread(ThreadEvent::Exited),
            "thread-group-exited" => AsyncClass::Thread(ThreadEvent::GroupExited),
            "thread-selected" => AsyncClass::Thread(ThreadEvent::Selected),
            "breakpoint-created" => AsyncClass::BreakPoint(BreakPointEvent::Created),
            "breakpoint-deleted" => AsyncClass::BreakPoint(BreakPointEvent::Deleted),
            "breakpoint-modified" => AsyncClass::BreakPoint(BreakPointEvent::Modified),
            other => AsyncClass::Other(other.to_string()),
        }
    }

    /// The wire spelling, for logging and generic dispatch.
    pub fn as_str(&self) -> &str {
        match self {
            AsyncClass::Running => "running",
            AsyncClass::Stopped => "stopped",
            AsyncClass::CmdParamChanged => "cmd-param-changed",
            AsyncClass::LibraryLoaded => "library-loaded",
            AsyncClass::Thread(ThreadEvent::Created) => "thread-created",
            AsyncClass::Thread(ThreadEvent::GroupStarted) => "thread-group-started",
            AsyncClass::Thread(ThreadEvent::Exited) => "thread-exited",
            AsyncClass::Thread(ThreadEvent::GroupExited) => "thread-group-exited",
            AsyncClass::Thread(ThreadEvent::Selected) => "thread-selected",
            AsyncClass::BreakPoint(BreakPointEvent::Created) => "breakpoint-created",
            AsyncClass::BreakPoint(BreakPointEvent::Deleted) => "breakpoint-deleted",
            AsyncClass::BreakPoint(BreakPointEvent::Modified) => "breakpoint-modified",
            AsyncClass::Other(s) => s,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncKind {
    Exec,
    Status,
    Notify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Console,
    Target,
    Log,
}

impl StreamKind {
    /// DAP output category for this stream.
    pub fn category(&self) -> &'static str {
        match self {
            StreamKind::Console => "console",
            StreamKind::Target => "stdout",
            StreamKind::Log => "log",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResultRecord {
    pub token: Option<u64>,
    pub class: ResultClass,
    pub results: Value,
}

impl ResultRecord {
    /// The human-readable reason of an `^error` record.
    pub fn error_msg(&self) -> String {
        self.results
            .get("msg")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string()
    }
}

#[derive(Debug, Clone)]
pub enum OutOfBandRecord {
    AsyncRecord {
        token: Option<u64>,
        kind: AsyncKind,
        class: AsyncClass,
        results: Value,
    },
    StreamRecord {
        kind: StreamKind,
        data: String,
    },
}

#[derive(Debug, Clone)]
pub enum Output {
    Result(ResultRecord),
    OutOfBand(OutOfBandRecord),
    /// The `(gdb)` prompt: end of the current batch.
    Prompt,
}

/// Incremental splitter for the MI byte stream.
///
/// Reading whole lines is not safe: c-string values may contain embedded
/// newlines, so a record boundary is a newline *outside* any c-string. The
/// buffer carries its string/escape scan state across `feed` calls, which
/// makes parsing resumable at any chunk boundary.
///
/// A record that fails to parse poisons its batch: everything up to the next
/// `(gdb)` prompt is dropped, and parsing resumes there.
#[derive(Debug, Default)]
pub struct RecordBuffer {
    buf: String,
    scan: usize,
    in_string: bool,
    escaped: bool,
    skipping: bool,
}

impl RecordBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of raw gdb output and return every record completed by
    /// it, in stream order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Output> {
        self.buf.push_str(&String::from_utf8_lossy(chunk));
        let mut records = Vec::new();
        loop {
            let Some(end) = self.scan_record_end() else {
                break;
            };
            let line: String = self.buf.drain(..end).collect();
            self.scan = 0;
            if line.trim().is_empty() {
                continue;
            }
            match Output::parse(&line) {
                Ok(Output::Prompt) => {
                    self.skipping = false;
                    records.push(Output::Prompt);
                }
                Ok(output) => {
                    if !self.skipping {
                        records.push(output);
                    }
                }
                Err(e) => {
                    error!("unparsable MI record: {}; skipping to next prompt", e);
                    self.skipping = true;
                }
            }
        }
        records
    }

    /// Find the byte index one past the next record-terminating newline,
    /// advancing the persistent scan state.
    fn scan_record_end(&mut self) -> Option<usize> {
        let bytes = self.buf.as_bytes();
        while self.scan < bytes.len() {
            let b = bytes[self.scan];
            self.scan += 1;
            if self.escaped {
                self.escaped = false;
                continue;
            }
            match b {
                b'\\' if self.in_string => self.escaped = true,
                b'"' => self.in_string = !self.in_string,
                b'\n' if !self.in_string => return Some(self.scan),
                _ => {}
            }
        }
        None
    }
}

impl Output {
    pub fn parse(line: &str) -> Result<Self, String> {
        output(line).map(|(_, record)| record).map_err(|e| match e {
            nom::Err::Incomplete(needed) => format!("truncated record (needed {:?})", needed),
            nom::Err::Error(e) | nom::Err::Failure(e) => e.to_string(),
        })
    }
}

fn fail<T>(input: &str, kind: ErrorKind) -> IResult<&str, T> {
    Err(nom::Err::Error(Error::new(input, kind)))
}

// Grammar, bottom up:
//
//   result-record := [token] "^" result-class ( "," result )*
//   async-record  := [token] ("*"|"+"|"=") async-class ( "," result )*
//   stream-record := ("~"|"@"|"&") c-string
//   result        := variable "=" value
//   value         := c-string | tuple | list
//   tuple         := "{" [ result ( "," result )* ] "}"
//   list          := "[" [ value ( "," value )* | result ( "," result )* ] "]"

/// `\n`, `\t`, `\r`, `\0`, `\xHH`, `\\`, `\"`. Decoded characters pass
/// through verbatim, no newline translation.
fn escaped_char(input: &str) -> IResult<&str, char> {
    let (rest, _) = char('\\').parse(input)?;
    let (rest, marker) = anychar(rest)?;
    match marker {
        'n' => Ok((rest, '\n')),
        'r' => Ok((rest, '\r')),
        't' => Ok((rest, '\t')),
        '0' => Ok((rest, '\0')),
        'b' => Ok((rest, '\u{08}')),
        'f' => Ok((rest, '\u{0C}')),
        '\\' => Ok((rest, '\\')),
        '"' => Ok((rest, '"')),
        'x' => {
            let (rest, digits) =
                take_while_m_n(2, 2, |c: char| c.is_ascii_hexdigit()).parse(rest)?;
            match u8::from_str_radix(digits, 16) {
                Ok(byte) => Ok((rest, byte as char)),
                Err(_) => fail(input, ErrorKind::HexDigit),
            }
        }
        _ => fail(input, ErrorKind::Escaped),
    }
}

/// c-string := `"` ( escape | any-but-quote-or-backslash )* `"`
///
/// Decoded by walking the body in runs: plain text up to the next quote or
/// backslash is copied through, escapes are decoded one at a time.
fn c_string(input: &str) -> IResult<&str, String> {
    let (mut rest, _) = char('"').parse(input)?;
    let mut decoded = String::new();
    loop {
        if let Some(after) = rest.strip_prefix('"') {
            return Ok((after, decoded));
        }
        if rest.starts_with('\\') {
            let (after, c) = escaped_char(rest)?;
            decoded.push(c);
            rest = after;
        } else {
            // plain run; an exhausted line means the quote never closed
            let Some(stop) = rest.find(['"', '\\']) else {
                return fail(input, ErrorKind::Char);
            };
            decoded.push_str(&rest[..stop]);
            rest = &rest[stop..];
        }
    }
}

/// variable names are words of letters, digits, `-` and `_`
fn variable(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_').parse(input)
}

/// value := c-string | tuple | list, dispatched on the opening character
fn mi_value(input: &str) -> IResult<&str, Value> {
    match input.chars().next() {
        Some('"') => map(c_string, Value::String).parse(input),
        Some('{') => tuple_value(input),
        Some('[') => list_value(input),
        _ => fail(input, ErrorKind::Alt),
    }
}

/// tuple := "{" [ result ( "," result )* ] "}"
fn tuple_value(input: &str) -> IResult<&str, Value> {
    map(
        delimited(char('{'), separated_list0(char(','), result_pair), char('}')),
        |pairs| Value::Object(Map::from_iter(pairs)),
    )
    .parse(input)
}

/// list := "[" [ value ( "," value )* | result ( "," result )* ] "]"
///
/// The named form drops the repeated names (`[frame={..},frame={..}]`);
/// consumers index those by position.
fn list_value(input: &str) -> IResult<&str, Value> {
    let plain = map(separated_list0(char(','), mi_value), Value::Array);
    let named = map(separated_list0(char(','), result_pair), |pairs| {
        Value::Array(pairs.into_iter().map(|(_, value)| value).collect())
    });
    delimited(char('['), alt((plain, named)), char(']')).parse(input)
}

/// result := variable "=" value
///
/// A multi-location breakpoint answers with several values after one name
/// (`bkpt={...},{...}`); the extras are folded into an array under that key
/// so nothing on the wire is lost.
fn result_pair(input: &str) -> IResult<&str, (String, Value)> {
    let (rest, name) = variable(input)?;
    let (rest, _) = char('=').parse(rest)?;
    let (rest, first) = mi_value(rest)?;
    let (rest, mut extras) = many0(preceded(char(','), mi_value)).parse(rest)?;
    let value = if extras.is_empty() {
        first
    } else {
        extras.insert(0, first);
        Value::Array(extras)
    };
    Ok((rest, (name.to_string(), value)))
}

/// The `( "," result )*` tail shared by result and async records.
fn record_fields(input: &str) -> IResult<&str, Value> {
    map(many0(preceded(char(','), result_pair)), |pairs| {
        Value::Object(Map::from_iter(pairs))
    })
    .parse(input)
}

/// result-class := "done" | "running" | "connected" | "error" | "exit"
fn result_class(input: &str) -> IResult<&str, ResultClass> {
    let (rest, word) = take_while1(|c: char| c.is_ascii_alphabetic()).parse(input)?;
    let class = match word {
        "done" => ResultClass::Done,
        "running" => ResultClass::Running,
        "connected" => ResultClass::Connected,
        "error" => ResultClass::Error,
        "exit" => ResultClass::Exit,
        _ => return fail(input, ErrorKind::Tag),
    };
    Ok((rest, class))
}

/// result-record := [token] "^" result-class ( "," result )*
fn result_record(input: &str) -> IResult<&str, Output> {
    let (rest, token) = opt(dec_u64).parse(input)?;
    let (rest, _) = char('^').parse(rest)?;
    let (rest, class) = result_class(rest)?;
    let (rest, results) = record_fields(rest)?;
    Ok((
        rest,
        Output::Result(ResultRecord {
            token,
            class,
            results,
        }),
    ))
}

/// async-record := [token] ("*"|"+"|"=") async-class ( "," result )*
///
/// The class is whatever word precedes the fields; anything this adapter
/// does not know is kept as text for the unknown-class handling upstream.
fn async_record(input: &str) -> IResult<&str, Output> {
    let (rest, token) = opt(dec_u64).parse(input)?;
    let (rest, marker) = one_of("*+=").parse(rest)?;
    let kind = match marker {
        '*' => AsyncKind::Exec,
        '+' => AsyncKind::Status,
        _ => AsyncKind::Notify,
    };
    let (rest, word) = is_not(",\r\n").parse(rest)?;
    let (rest, results) = record_fields(rest)?;
    Ok((
        rest,
        Output::OutOfBand(OutOfBandRecord::AsyncRecord {
            token,
            kind,
            class: AsyncClass::from_wire(word),
            results,
        }),
    ))
}

/// stream-record := ("~"|"@"|"&") c-string
fn stream_record(input: &str) -> IResult<&str, Output> {
    let (rest, marker) = one_of("~@&").parse(input)?;
    let kind = match marker {
        '~' => StreamKind::Console,
        '@' => StreamKind::Target,
        _ => StreamKind::Log,
    };
    let (rest, data) = c_string(rest)?;
    Ok((
        rest,
        Output::OutOfBand(OutOfBandRecord::StreamRecord { kind, data }),
    ))
}

/// The batch terminator. gdb prints it with a trailing space.
fn prompt(input: &str) -> IResult<&str, Output> {
    let (rest, _) = tag("(gdb)").parse(input)?;
    let (rest, _) = opt(char(' ')).parse(rest)?;
    Ok((rest, Output::Prompt))
}

/// Lines that are not MI records at all are inferior stdout leaking onto the
/// gdb channel; surface them as target stream output.
fn raw_line(input: &str) -> IResult<&str, Output> {
    map(is_not("\r\n"), |text: &str| {
        Output::OutOfBand(OutOfBandRecord::StreamRecord {
            kind: StreamKind::Target,
            data: text.to_string(),
        })
    })
    .parse(input)
}

fn output(input: &str) -> IResult<&str, Output> {
    let (rest, record) =
        alt((result_record, stream_record, async_record, prompt, raw_line)).parse(input)?;
    let (rest, _) = line_ending(rest)?;
    Ok((rest, record))
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse_one(line: &str) -> Output {
        Output::parse(line).unwrap_or_else(|e| panic!("parse output failed: {}", e))
    }

    #[test]
    fn test_notify_record() {
        let output = parse_one("=library-loaded,ranges=[{}]\n");
        if let Output::OutOfBand(OutOfBandRecord::AsyncRecord {
            kind,
            class,
            results,
            ..
        }) = output
        {
            assert_eq!(kind, AsyncKind::Notify);
            assert_eq!(class, AsyncClass::LibraryLoaded);
            assert_eq!(
                results.get("ranges"),
                Some(&Value::Array(vec![Value::Object(Map::new())]))
            );
        } else {
            panic!("output is not an out of band record");
        }
    }

    #[test]
    fn test_result_record() {
        let output = parse_one(
            "7^done,bkpt={number=\"1\",type=\"breakpoint\",disp=\"keep\",enabled=\"y\",\
             addr=\"0x0000000000018fdf\",func=\"main\",file=\"empty.c\",\
             fullname=\"/tmp/empty.c\",line=\"3\",thread-groups=[\"i1\"],times=\"0\",\
             original-location=\"-source /tmp/empty.c -line 3\"}\n",
        );
        let Output::Result(result) = output else {
            panic!("not a result record");
        };
        assert_eq!(result.token, Some(7));
        assert_eq!(result.class, ResultClass::Done);
        let bkpt = result.results.get("bkpt").expect("bkpt is not found");
        assert_eq!(bkpt["number"], Value::String("1".to_string()));
        assert_eq!(
            bkpt["original-location"],
            Value::String("-source /tmp/empty.c -line 3".to_string())
        );
        assert_eq!(
            bkpt["thread-groups"],
            Value::Array(vec![Value::String("i1".to_string())])
        );
    }

    #[test]
    fn test_error_record_msg() {
        let output = parse_one("12^error,msg=\"No symbol \\\"foo\\\" in current context.\"\n");
        let Output::Result(result) = output else {
            panic!("not a result record");
        };
        assert_eq!(result.class, ResultClass::Error);
        assert_eq!(result.token, Some(12));
        assert_eq!(result.error_msg(), "No symbol \"foo\" in current context.");
    }

    #[test]
    fn test_exec_async_stopped() {
        let output = parse_one(
            "*stopped,reason=\"breakpoint-hit\",disp=\"keep\",bkptno=\"1\",\
             frame={addr=\"0x000055555557003f\",func=\"main\",args=[],file=\"empty.c\",\
             fullname=\"/tmp/empty.c\",line=\"3\",arch=\"i386:x86-64\"},\
             thread-id=\"1\",stopped-threads=\"all\",core=\"0\"\n",
        );
        let Output::OutOfBand(OutOfBandRecord::AsyncRecord {
            kind,
            class,
            results,
            ..
        }) = output
        else {
            panic!("output is not an out of band record");
        };
        assert_eq!(kind, AsyncKind::Exec);
        assert_eq!(class, AsyncClass::Stopped);
        assert_eq!(
            results.get("reason"),
            Some(&Value::String("breakpoint-hit".to_string()))
        );
        let frame = results.get("frame").expect("frame is not found");
        assert_eq!(frame.get("line"), Some(&Value::String("3".to_string())));
        assert_eq!(frame.get("args"), Some(&Value::Array(vec![])));
    }

    #[test]
    fn test_status_async() {
        let output = parse_one("+download,section=\".text\",section-size=\"6668\"\n");
        let Output::OutOfBand(OutOfBandRecord::AsyncRecord { kind, class, .. }) = output else {
            panic!("output is not an out of band record");
        };
        assert_eq!(kind, AsyncKind::Status);
        assert_eq!(class, AsyncClass::Other("download".to_string()));
    }

    #[test]
    fn test_stream_records() {
        let Output::OutOfBand(OutOfBandRecord::StreamRecord { kind, data }) =
            parse_one("~\"a\\\"b\"\n")
        else {
            panic!("not a stream record");
        };
        assert_eq!(kind, StreamKind::Console);
        assert_eq!(data, "a\"b");

        let Output::OutOfBand(OutOfBandRecord::StreamRecord { kind, data }) =
            parse_one("&\"warning\\n\"\n")
        else {
            panic!("not a stream record");
        };
        assert_eq!(kind, StreamKind::Log);
        assert_eq!(data, "warning\n");
    }

    #[test]
    fn test_c_string_escapes() {
        let Output::OutOfBand(OutOfBandRecord::StreamRecord { data, .. }) =
            parse_one("~\"tab\\there\\x21 nul\\0 cr\\r\"\n")
        else {
            panic!("not a stream record");
        };
        assert_eq!(data, "tab\there! nul\0 cr\r");
    }

    #[test]
    fn test_prompt() {
        assert!(matches!(parse_one("(gdb) \n"), Output::Prompt));
        assert!(matches!(parse_one("(gdb)\n"), Output::Prompt));
    }

    #[test]
    fn test_buffer_reassembles_split_records() {
        let whole = "3^done,value=\"{a = 1, b = 2}\"\n(gdb) \n";
        // Split at every possible byte boundary; the reassembled records
        // must match the unsplit parse.
        for split in 1..whole.len() {
            let mut buffer = RecordBuffer::new();
            let mut records = buffer.feed(&whole.as_bytes()[..split]);
            records.extend(buffer.feed(&whole.as_bytes()[split..]));
            assert_eq!(records.len(), 2, "split at {}", split);
            let Output::Result(record) = &records[0] else {
                panic!("expected result record at split {}", split);
            };
            assert_eq!(record.token, Some(3));
            assert_eq!(
                record.results.get("value"),
                Some(&Value::String("{a = 1, b = 2}".to_string()))
            );
            assert!(matches!(records[1], Output::Prompt));
        }
    }

    #[test]
    fn test_buffer_newline_inside_string() {
        let mut buffer = RecordBuffer::new();
        // A raw newline embedded in a c-string must not terminate the record.
        let records = buffer.feed(b"~\"line one\nline two\"\n");
        assert_eq!(records.len(), 1);
        let Output::OutOfBand(OutOfBandRecord::StreamRecord { data, .. }) = &records[0] else {
            panic!("not a stream record");
        };
        assert_eq!(data, "line one\nline two");
    }

    #[test]
    fn test_buffer_skips_bad_batch_to_prompt() {
        let mut buffer = RecordBuffer::new();
        // Unterminated tuple: the batch is dropped up to the prompt, and the
        // next batch parses normally.
        let records = buffer.feed(b"^done,bkpt={number=\"1\"\n^done,ok=\"1\"\n(gdb) \n5^done\n");
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0], Output::Prompt));
        let Output::Result(record) = &records[1] else {
            panic!("expected recovered result record");
        };
        assert_eq!(record.token, Some(5));
    }

    #[test]
    fn test_raw_line_is_target_output() {
        let Output::OutOfBand(OutOfBandRecord::StreamRecord { kind, data }) =
            parse_one("hello from the inferior\n")
        else {
            panic!("not a stream record");
        };
        assert_eq!(kind, StreamKind::Target);
        assert_eq!(data, "hello from the inferior");
    }

    #[test]
    fn test_multi_location_insert_folds_to_array() {
        let output = parse_one(
            "^done,bkpt={number=\"1\",addr=\"<MULTIPLE>\"},{number=\"1.1\",addr=\"0x1000\"},\
             {number=\"1.2\",addr=\"0x2000\"}\n",
        );
        let Output::Result(record) = output else {
            panic!("not a result record");
        };
        let rows = record.results["bkpt"].as_array().expect("folded array");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["number"], Value::String("1".to_string()));
        assert_eq!(rows[2]["number"], Value::String("1.2".to_string()));
    }

    #[test]
    fn test_unterminated_string_falls_back_to_raw() {
        // not a decodable stream record; the whole line is treated as
        // leaked inferior output instead
        let Output::OutOfBand(OutOfBandRecord::StreamRecord { kind, data }) =
            parse_one("~\"no closing quote\n")
        else {
            panic!("not a stream record");
        };
        assert_eq!(kind, StreamKind::Target);
        assert_eq!(data, "~\"no closing quote");
    }
}
