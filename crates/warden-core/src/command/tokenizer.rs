//! Shell command line tokenizer.
//!
//! Splits a command line into simple commands joined by `&&`, `||`, `;`,
//! `|` (and newlines), honoring single/double quotes and backslash escapes.
//! Nothing is expanded: `$HOME` stays the literal text `$HOME`.
//!
//! Anything whose effect cannot be seen from the text alone fails the whole
//! line: subshells and `{ }` groups, command substitution (backticks and
//! `$(...)`), process substitution, and `&` backgrounding. Redirections are
//! recorded on the command so the policy can judge them.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOp {
    /// The first command of a sequence.
    Start,
    And,
    Or,
    Seq,
    Pipe,
}

impl ControlOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlOp::Start => "",
            ControlOp::And => "&&",
            ControlOp::Or => "||",
            ControlOp::Seq => ";",
            ControlOp::Pipe => "|",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// `>`
    Output,
    /// `>>`
    Append,
    /// `>|`
    Clobber,
    /// `<>`
    ReadWrite,
    /// `&>`, `&>>`, `>&file`
    OutputBoth,
    /// `<`
    Input,
    /// `<<`, `<<-`
    Heredoc,
    /// `<<<`
    HereString,
    /// `2>&1`, `<&0`, `>&-`
    DupFd,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirection {
    pub fd: Option<u32>,
    pub kind: RedirectKind,
    pub operator: String,
    /// File name, descriptor, or heredoc delimiter.
    pub target: String,
}

/// One program invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SimpleCommand {
    pub program: String,
    pub args: Vec<String>,
    /// The command's source text, without heredoc bodies.
    pub raw: String,
    pub redirections: Vec<Redirection>,
}

/// Commands in source order, each tagged with the operator that precedes it.
pub type CommandSequence = Vec<(ControlOp, SimpleCommand)>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenizeError {
    #[error("empty command")]
    Empty,

    #[error("empty command around '{0}'")]
    EmptySegment(String),

    #[error("subshells and command grouping are not allowed")]
    Subshell,

    #[error("command substitution is not allowed")]
    CommandSubstitution,

    #[error("process substitution is not allowed")]
    ProcessSubstitution,

    #[error("background execution with '&' is not allowed")]
    Background,

    #[error("unterminated {0} quote")]
    UnterminatedQuote(char),

    #[error("heredoc '{0}' is never terminated")]
    UnterminatedHeredoc(String),

    #[error("missing target for redirection '{0}'")]
    MissingRedirectTarget(String),

    #[error("redirection without a command")]
    BareRedirection,
}

/// Tokenize `line` into a [`CommandSequence`].
pub fn tokenize(line: &str) -> Result<CommandSequence, TokenizeError> {
    let tokens = Lexer::new(line).run()?;

    let mut sequence = Vec::new();
    let mut current = Builder::default();
    let mut next_op = ControlOp::Start;
    let mut dangling: Option<ControlOp> = None;

    for token in tokens {
        match token {
            Token::Word { text, start, end } => {
                current.extend_span(start, end);
                current.words.push(text);
            }
            Token::Redirect {
                redirection,
                start,
                end,
            } => {
                current.extend_span(start, end);
                current.redirections.push(redirection);
            }
            Token::Newline => {
                if !current.is_empty() {
                    sequence.push((next_op, current.finish(line)?));
                    next_op = ControlOp::Seq;
                    dangling = None;
                }
            }
            Token::Control(op) => {
                if current.is_empty() {
                    return Err(TokenizeError::EmptySegment(op.as_str().to_string()));
                }
                sequence.push((next_op, current.finish(line)?));
                next_op = op;
                dangling = (op != ControlOp::Seq).then_some(op);
            }
        }
    }

    if !current.is_empty() {
        sequence.push((next_op, current.finish(line)?));
        dangling = None;
    }
    if let Some(op) = dangling {
        return Err(TokenizeError::EmptySegment(op.as_str().to_string()));
    }
    if sequence.is_empty() {
        return Err(TokenizeError::Empty);
    }
    Ok(sequence)
}

#[derive(Default)]
struct Builder {
    words: Vec<String>,
    redirections: Vec<Redirection>,
    span: Option<(usize, usize)>,
}

impl Builder {
    fn is_empty(&self) -> bool {
        self.words.is_empty() && self.redirections.is_empty()
    }

    fn extend_span(&mut self, start: usize, end: usize) {
        self.span = Some(match self.span {
            Some((first, _)) => (first, end),
            None => (start, end),
        });
    }

    fn finish(&mut self, line: &str) -> Result<SimpleCommand, TokenizeError> {
        let Builder {
            words,
            redirections,
            span,
        } = std::mem::take(self);

        let mut words = words.into_iter();
        let program = words.next().ok_or(TokenizeError::BareRedirection)?;
        if program == "{" || program == "}" {
            return Err(TokenizeError::Subshell);
        }

        Ok(SimpleCommand {
            program,
            args: words.collect(),
            raw: span
                .map(|(start, end)| line[start..end].to_string())
                .unwrap_or_default(),
            redirections,
        })
    }
}

// ============================================================================
// LEXER
// ============================================================================

enum Token {
    Word {
        text: String,
        start: usize,
        end: usize,
    },
    Redirect {
        redirection: Redirection,
        start: usize,
        end: usize,
    },
    Control(ControlOp),
    Newline,
}

struct PendingHeredoc {
    delimiter: String,
    strip_tabs: bool,
    /// Unquoted delimiters mean the body is subject to expansion.
    expands: bool,
}

/// Longest operators first.
const REDIRECT_OPERATORS: [(&str, RedirectKind); 12] = [
    ("&>>", RedirectKind::OutputBoth),
    ("&>", RedirectKind::OutputBoth),
    ("<<<", RedirectKind::HereString),
    ("<<-", RedirectKind::Heredoc),
    ("<<", RedirectKind::Heredoc),
    ("<&", RedirectKind::DupFd),
    ("<>", RedirectKind::ReadWrite),
    ("<", RedirectKind::Input),
    (">>", RedirectKind::Append),
    (">|", RedirectKind::Clobber),
    (">&", RedirectKind::DupFd),
    (">", RedirectKind::Output),
];

struct Lexer<'a> {
    src: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
    tokens: Vec<Token>,
    word: String,
    word_start: Option<usize>,
    word_quoted: bool,
    heredocs: Vec<PendingHeredoc>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().collect(),
            pos: 0,
            tokens: Vec::new(),
            word: String::new(),
            word_start: None,
            word_quoted: false,
            heredocs: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<Token>, TokenizeError> {
        while let Some(c) = self.peek(0) {
            match c {
                ' ' | '\t' | '\r' => {
                    self.finish_word();
                    self.pos += 1;
                }
                '\n' => {
                    self.finish_word();
                    self.pos += 1;
                    self.tokens.push(Token::Newline);
                    self.read_heredoc_bodies()?;
                }
                '\\' => self.escape(),
                '\'' => self.single_quoted()?,
                '"' => self.double_quoted()?,
                '`' => return Err(TokenizeError::CommandSubstitution),
                '$' if self.peek(1) == Some('(') => return Err(TokenizeError::CommandSubstitution),
                '(' | ')' => return Err(TokenizeError::Subshell),
                ';' => self.control(ControlOp::Seq, 1),
                '&' => match self.peek(1) {
                    Some('&') => self.control(ControlOp::And, 2),
                    Some('>') => self.redirect()?,
                    _ => return Err(TokenizeError::Background),
                },
                '|' => match self.peek(1) {
                    Some('|') => self.control(ControlOp::Or, 2),
                    Some('&') => self.control(ControlOp::Pipe, 2),
                    _ => self.control(ControlOp::Pipe, 1),
                },
                '<' | '>' => self.redirect()?,
                '#' if self.word_start.is_none() => self.skip_comment(),
                _ => self.push_char(c),
            }
        }

        self.finish_word();
        if let Some(heredoc) = self.heredocs.first() {
            return Err(TokenizeError::UnterminatedHeredoc(heredoc.delimiter.clone()));
        }
        Ok(self.tokens)
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).map(|&(_, c)| c)
    }

    /// Byte offset of char index `pos`.
    fn byte(&self, pos: usize) -> usize {
        self.chars
            .get(pos)
            .map(|&(byte, _)| byte)
            .unwrap_or(self.src.len())
    }

    fn start_word(&mut self) {
        if self.word_start.is_none() {
            self.word_start = Some(self.byte(self.pos));
        }
    }

    fn push_char(&mut self, c: char) {
        self.start_word();
        self.word.push(c);
        self.pos += 1;
    }

    fn finish_word(&mut self) {
        if let Some(start) = self.word_start.take() {
            self.tokens.push(Token::Word {
                text: std::mem::take(&mut self.word),
                start,
                end: self.byte(self.pos),
            });
            self.word_quoted = false;
        }
    }

    fn control(&mut self, op: ControlOp, width: usize) {
        self.finish_word();
        self.tokens.push(Token::Control(op));
        self.pos += width;
    }

    fn skip_comment(&mut self) {
        while matches!(self.peek(0), Some(c) if c != '\n') {
            self.pos += 1;
        }
    }

    fn escape(&mut self) {
        match self.peek(1) {
            // Line continuation.
            Some('\n') => self.pos += 2,
            Some(next) => {
                self.start_word();
                self.word.push(next);
                self.word_quoted = true;
                self.pos += 2;
            }
            None => self.push_char('\\'),
        }
    }

    fn single_quoted(&mut self) -> Result<(), TokenizeError> {
        self.start_word();
        self.word_quoted = true;
        self.pos += 1;
        loop {
            match self.peek(0) {
                None => return Err(TokenizeError::UnterminatedQuote('\'')),
                Some('\'') => {
                    self.pos += 1;
                    return Ok(());
                }
                Some(c) => {
                    self.word.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn double_quoted(&mut self) -> Result<(), TokenizeError> {
        self.start_word();
        self.word_quoted = true;
        self.pos += 1;
        loop {
            match self.peek(0) {
                None => return Err(TokenizeError::UnterminatedQuote('"')),
                Some('"') => {
                    self.pos += 1;
                    return Ok(());
                }
                Some('\\') => match self.peek(1) {
                    Some(c @ ('"' | '\\' | '$' | '`')) => {
                        self.word.push(c);
                        self.pos += 2;
                    }
                    Some('\n') => self.pos += 2,
                    _ => {
                        self.word.push('\\');
                        self.pos += 1;
                    }
                },
                Some('`') => return Err(TokenizeError::CommandSubstitution),
                Some('$') if self.peek(1) == Some('(') => {
                    return Err(TokenizeError::CommandSubstitution)
                }
                Some(c) => {
                    self.word.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    /// Read one word in redirection-target position.
    fn read_word(&mut self) -> Result<Option<(String, bool)>, TokenizeError> {
        while matches!(self.peek(0), Some(' ' | '\t')) {
            self.pos += 1;
        }
        loop {
            match self.peek(0) {
                None | Some(' ' | '\t' | '\r' | '\n' | ';' | '&' | '|' | '<' | '>') => break,
                Some('(' | ')') => return Err(TokenizeError::Subshell),
                Some('`') => return Err(TokenizeError::CommandSubstitution),
                Some('$') if self.peek(1) == Some('(') => {
                    return Err(TokenizeError::CommandSubstitution)
                }
                Some('\\') => self.escape(),
                Some('\'') => self.single_quoted()?,
                Some('"') => self.double_quoted()?,
                Some(c) => self.push_char(c),
            }
        }

        if self.word_start.take().is_none() {
            return Ok(None);
        }
        let quoted = std::mem::replace(&mut self.word_quoted, false);
        Ok(Some((std::mem::take(&mut self.word), quoted)))
    }

    fn redirect(&mut self) -> Result<(), TokenizeError> {
        let mut start = self.byte(self.pos);

        // Unquoted digits directly before the operator name the descriptor.
        let fd = match self.word_start {
            Some(word_start)
                if !self.word_quoted
                    && !self.word.is_empty()
                    && self.word.bytes().all(|b| b.is_ascii_digit()) =>
            {
                start = word_start;
                self.word_start = None;
                std::mem::take(&mut self.word).parse::<u32>().ok()
            }
            _ => {
                self.finish_word();
                None
            }
        };

        let ahead: String = self.chars[self.pos..]
            .iter()
            .take(3)
            .map(|&(_, c)| c)
            .collect();
        if ahead.starts_with("<(") || ahead.starts_with(">(") {
            return Err(TokenizeError::ProcessSubstitution);
        }
        let Some(&(operator, kind)) = REDIRECT_OPERATORS
            .iter()
            .find(|(op, _)| ahead.starts_with(op))
        else {
            return Err(TokenizeError::MissingRedirectTarget(ahead));
        };
        self.pos += operator.len();

        let (target, quoted) = self
            .read_word()?
            .ok_or_else(|| TokenizeError::MissingRedirectTarget(operator.to_string()))?;

        let kind = match kind {
            RedirectKind::DupFd if target == "-" || target.bytes().all(|b| b.is_ascii_digit()) => {
                RedirectKind::DupFd
            }
            RedirectKind::DupFd if operator == ">&" => RedirectKind::OutputBoth,
            RedirectKind::DupFd => RedirectKind::Input,
            other => other,
        };

        if kind == RedirectKind::Heredoc {
            self.heredocs.push(PendingHeredoc {
                delimiter: target.clone(),
                strip_tabs: operator == "<<-",
                expands: !quoted,
            });
        }

        self.tokens.push(Token::Redirect {
            redirection: Redirection {
                fd,
                kind,
                operator: operator.to_string(),
                target,
            },
            start,
            end: self.byte(self.pos),
        });
        Ok(())
    }

    /// Consume the bodies of heredocs opened on the line that just ended.
    fn read_heredoc_bodies(&mut self) -> Result<(), TokenizeError> {
        let src = self.src;
        for heredoc in std::mem::take(&mut self.heredocs) {
            loop {
                if self.pos >= self.chars.len() {
                    return Err(TokenizeError::UnterminatedHeredoc(heredoc.delimiter));
                }
                let line_start = self.byte(self.pos);
                let line_end = src[line_start..]
                    .find('\n')
                    .map(|i| line_start + i)
                    .unwrap_or(src.len());
                let line = &src[line_start..line_end];

                while self.pos < self.chars.len() && self.byte(self.pos) <= line_end {
                    self.pos += 1;
                }

                let candidate = if heredoc.strip_tabs {
                    line.trim_start_matches('\t')
                } else {
                    line
                };
                if candidate == heredoc.delimiter {
                    break;
                }
                if heredoc.expands && (line.contains('`') || line.contains("$(")) {
                    return Err(TokenizeError::CommandSubstitution);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn programs(line: &str) -> Vec<(ControlOp, String)> {
        tokenize(line)
            .unwrap()
            .into_iter()
            .map(|(op, cmd)| (op, cmd.program))
            .collect()
    }

    mod sequencing {
        use super::*;

        #[test]
        fn splits_on_control_operators() {
            assert_eq!(
                programs("echo hi && ls | wc -l; pwd || true"),
                vec![
                    (ControlOp::Start, "echo".to_string()),
                    (ControlOp::And, "ls".to_string()),
                    (ControlOp::Pipe, "wc".to_string()),
                    (ControlOp::Seq, "pwd".to_string()),
                    (ControlOp::Or, "true".to_string()),
                ]
            );
        }

        #[test]
        fn operators_without_spaces() {
            assert_eq!(
                programs("ls&&pwd"),
                vec![
                    (ControlOp::Start, "ls".to_string()),
                    (ControlOp::And, "pwd".to_string()),
                ]
            );
        }

        #[test]
        fn newline_separates_commands() {
            assert_eq!(
                programs("ls\n\npwd\n"),
                vec![
                    (ControlOp::Start, "ls".to_string()),
                    (ControlOp::Seq, "pwd".to_string()),
                ]
            );
        }

        #[test]
        fn newline_after_and_continues() {
            assert_eq!(
                programs("ls &&\npwd"),
                vec![
                    (ControlOp::Start, "ls".to_string()),
                    (ControlOp::And, "pwd".to_string()),
                ]
            );
        }

        #[test]
        fn trailing_semicolon_is_fine() {
            assert_eq!(programs("ls;").len(), 1);
        }

        #[test]
        fn dangling_operators() {
            assert!(matches!(tokenize("ls &&"), Err(TokenizeError::EmptySegment(_))));
            assert!(matches!(tokenize("| ls"), Err(TokenizeError::EmptySegment(_))));
            assert!(matches!(tokenize("ls ;; pwd"), Err(TokenizeError::EmptySegment(_))));
        }

        #[test]
        fn empty_lines() {
            assert_eq!(tokenize(""), Err(TokenizeError::Empty));
            assert_eq!(tokenize("   \n "), Err(TokenizeError::Empty));
            assert_eq!(tokenize("# just a comment"), Err(TokenizeError::Empty));
        }

        #[test]
        fn raw_text_is_trimmed_per_command() {
            let seq = tokenize("echo  hi   &&  ls -la").unwrap();
            assert_eq!(seq[0].1.raw, "echo  hi");
            assert_eq!(seq[1].1.raw, "ls -la");
        }
    }

    mod quoting {
        use super::*;

        #[test]
        fn quotes_and_escapes() {
            let seq = tokenize(r#"echo 'a b' "c d" e\ f"#).unwrap();
            assert_eq!(seq[0].1.args, vec!["a b", "c d", "e f"]);
        }

        #[test]
        fn operators_inside_quotes_are_literal() {
            let seq = tokenize(r#"echo "a && b" 'c | d; (e)'"#).unwrap();
            assert_eq!(seq.len(), 1);
            assert_eq!(seq[0].1.args, vec!["a && b", "c | d; (e)"]);
        }

        #[test]
        fn no_expansion() {
            let seq = tokenize("echo $HOME ~ *.rs").unwrap();
            assert_eq!(seq[0].1.args, vec!["$HOME", "~", "*.rs"]);
        }

        #[test]
        fn empty_quotes_are_a_word() {
            let seq = tokenize("echo ''").unwrap();
            assert_eq!(seq[0].1.args, vec![""]);
        }

        #[test]
        fn single_quotes_hide_substitution() {
            let seq = tokenize("echo '$(id)' '`id`'").unwrap();
            assert_eq!(seq[0].1.args, vec!["$(id)", "`id`"]);
        }

        #[test]
        fn unterminated_quotes() {
            assert_eq!(tokenize("echo 'hi"), Err(TokenizeError::UnterminatedQuote('\'')));
            assert_eq!(tokenize("echo \"hi"), Err(TokenizeError::UnterminatedQuote('"')));
        }

        #[test]
        fn comment_ends_the_line() {
            let seq = tokenize("ls # && rm -rf /").unwrap();
            assert_eq!(seq.len(), 1);
            assert!(seq[0].1.args.is_empty());
        }

        #[test]
        fn hash_inside_word_is_literal() {
            let seq = tokenize("echo a#b").unwrap();
            assert_eq!(seq[0].1.args, vec!["a#b"]);
        }
    }

    mod fail_closed {
        use super::*;

        #[test]
        fn subshells() {
            let err = tokenize("true; (echo hi)").unwrap_err();
            assert_eq!(err, TokenizeError::Subshell);
            assert!(err.to_string().contains("subshells"));
        }

        #[test]
        fn brace_groups() {
            assert_eq!(tokenize("{ ls; }"), Err(TokenizeError::Subshell));
        }

        #[test]
        fn command_substitution() {
            for line in ["echo $(whoami)", "echo `whoami`", "echo \"$(id)\"", "echo \"`id`\""] {
                assert_eq!(tokenize(line), Err(TokenizeError::CommandSubstitution), "{line}");
            }
        }

        #[test]
        fn process_substitution() {
            assert_eq!(tokenize("diff <(ls) b"), Err(TokenizeError::ProcessSubstitution));
            assert_eq!(tokenize("tee >(cat)"), Err(TokenizeError::ProcessSubstitution));
        }

        #[test]
        fn background() {
            assert_eq!(tokenize("sleep 1 &"), Err(TokenizeError::Background));
            assert_eq!(tokenize("sleep 1 & ls"), Err(TokenizeError::Background));
        }
    }

    mod redirections {
        use super::*;

        #[test]
        fn output_and_dup() {
            let seq = tokenize("ls > out.txt 2>&1").unwrap();
            let cmd = &seq[0].1;
            assert!(cmd.args.is_empty());
            assert_eq!(cmd.redirections.len(), 2);
            assert_eq!(cmd.redirections[0].kind, RedirectKind::Output);
            assert_eq!(cmd.redirections[0].target, "out.txt");
            assert_eq!(cmd.redirections[1].kind, RedirectKind::DupFd);
            assert_eq!(cmd.redirections[1].fd, Some(2));
            assert_eq!(cmd.redirections[1].target, "1");
        }

        #[test]
        fn attached_to_word() {
            let seq = tokenize("echo hi>f").unwrap();
            assert_eq!(seq[0].1.args, vec!["hi"]);
            assert_eq!(seq[0].1.redirections[0].target, "f");
            assert_eq!(seq[0].1.redirections[0].fd, None);
        }

        #[test]
        fn kinds() {
            let kind = |line: &str| tokenize(line).unwrap()[0].1.redirections[0].kind;
            assert_eq!(kind("cmd >> f"), RedirectKind::Append);
            assert_eq!(kind("cmd >| f"), RedirectKind::Clobber);
            assert_eq!(kind("cmd &> f"), RedirectKind::OutputBoth);
            assert_eq!(kind("cmd >& f"), RedirectKind::OutputBoth);
            assert_eq!(kind("cmd < f"), RedirectKind::Input);
            assert_eq!(kind("cmd <<< word"), RedirectKind::HereString);
            assert_eq!(kind("cmd 2>&-"), RedirectKind::DupFd);
        }

        #[test]
        fn missing_target() {
            assert!(matches!(
                tokenize("ls >"),
                Err(TokenizeError::MissingRedirectTarget(_))
            ));
        }

        #[test]
        fn bare_redirection() {
            assert_eq!(tokenize("> f"), Err(TokenizeError::BareRedirection));
        }
    }

    mod heredocs {
        use super::*;

        #[test]
        fn body_is_consumed() {
            let seq = tokenize("cat <<EOF\nhello && world\nEOF\nls").unwrap();
            assert_eq!(seq.len(), 2);
            assert_eq!(seq[0].1.program, "cat");
            assert_eq!(seq[0].1.redirections[0].kind, RedirectKind::Heredoc);
            assert_eq!(seq[0].1.redirections[0].target, "EOF");
            assert_eq!(seq[1].0, ControlOp::Seq);
            assert_eq!(seq[1].1.program, "ls");
        }

        #[test]
        fn quoted_delimiter_body_is_literal() {
            assert!(tokenize("cat <<'EOF'\n$(rm -rf /)\nEOF").is_ok());
        }

        #[test]
        fn unquoted_delimiter_body_is_checked() {
            assert_eq!(
                tokenize("cat <<EOF\n$(rm -rf /)\nEOF"),
                Err(TokenizeError::CommandSubstitution)
            );
        }

        #[test]
        fn dash_strips_tabs() {
            assert!(tokenize("cat <<-EOF\n\thi\n\tEOF").is_ok());
        }

        #[test]
        fn unterminated() {
            assert_eq!(
                tokenize("cat <<EOF\nhello"),
                Err(TokenizeError::UnterminatedHeredoc("EOF".to_string()))
            );
            assert_eq!(
                tokenize("cat <<EOF"),
                Err(TokenizeError::UnterminatedHeredoc("EOF".to_string()))
            );
        }
    }
}
