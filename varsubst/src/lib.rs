#![doc = include_str!("../README.md")]

use std::borrow::{Borrow, Cow};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::hash::Hash;
use std::iter::{Enumerate, Peekable};
use std::marker::PhantomData;
use std::str::Chars;

use indicio::{clue, ERROR, INFO};

//////////////////////////////////////////// biometrics ////////////////////////////////////////////

static SUBSTITUTE: biometrics::Counter = biometrics::Counter::new("varsubst.substitute");
static RESOLVE: biometrics::Counter = biometrics::Counter::new("varsubst.resolve");
static NO_VALUE: biometrics::Counter = biometrics::Counter::new("varsubst.resolve.no_value");
static ESCAPE: biometrics::Counter = biometrics::Counter::new("varsubst.escape");
static LENIENT: biometrics::Counter = biometrics::Counter::new("varsubst.lenient");
static NO_NAME: biometrics::Counter = biometrics::Counter::new("varsubst.error.no_name");
static UNTERMINATED_VARIABLE: biometrics::Counter =
    biometrics::Counter::new("varsubst.error.unterminated_variable");
static BAD_CHARACTER: biometrics::Counter =
    biometrics::Counter::new("varsubst.error.bad_character");

/// Register the biometrics for this crate.
pub fn register_biometrics(collector: &biometrics::Collector) {
    collector.register_counter(&SUBSTITUTE);
    collector.register_counter(&RESOLVE);
    collector.register_counter(&NO_VALUE);
    collector.register_counter(&ESCAPE);
    collector.register_counter(&LENIENT);
    collector.register_counter(&NO_NAME);
    collector.register_counter(&UNTERMINATED_VARIABLE);
    collector.register_counter(&BAD_CHARACTER);
}

////////////////////////////////////////////// indicio /////////////////////////////////////////////

/// The collector for clues emitted by varsubst.
pub static COLLECTOR: indicio::Collector = indicio::Collector::new();

/////////////////////////////////////////////// Error //////////////////////////////////////////////

/// A malformed variable reference.
///
/// Columns are zero-based offsets into the input, counted in characters rather than bytes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// A braced reference closed without naming a variable, as in `${}`.  The column is that of
    /// the opening brace.
    NoName { column: usize },
    /// The input ended before a `${NAME}` or `%NAME%` reference was closed.
    UnterminatedVariable { name: String },
    /// A character outside the permitted class appeared before the closing delimiter.
    BadCharacter {
        name: String,
        character: char,
        column: usize,
    },
}

impl Error {
    fn click(&self) {
        match self {
            Error::NoName { .. } => NO_NAME.click(),
            Error::UnterminatedVariable { .. } => UNTERMINATED_VARIABLE.click(),
            Error::BadCharacter { .. } => BAD_CHARACTER.click(),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            Error::NoName { column } => {
                write!(f, "variable with no name at column {column}")
            }
            Error::UnterminatedVariable { name } => {
                write!(f, "unterminated variable {name:?}")
            }
            Error::BadCharacter {
                name,
                character,
                column,
            } => {
                write!(
                    f,
                    "bad character {character:?} at column {column} in variable {name:?}"
                )
            }
        }
    }
}

impl std::error::Error for Error {}

////////////////////////////////////////////// Options /////////////////////////////////////////////

/// Options that control which forms are recognized and how malformed references are handled.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Options {
    /// Recognize `%NAME%` and the `%%` escape.
    pub percent: bool,
    /// Recognize `$NAME`, `${NAME}`, and the `$$` escape.
    pub dollar: bool,
    /// Fail on malformed references rather than copying them to the output.
    pub strict: bool,
}

impl Options {
    /// The default options, except malformed references are reproduced literally.
    pub fn lenient() -> Self {
        Self {
            strict: false,
            ..Self::default()
        }
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            percent: true,
            dollar: true,
            strict: true,
        }
    }
}

//////////////////////////////////////// CommandLineOptions ////////////////////////////////////////

/// Command-line switches for varsubst.  Every form is recognized and strict unless turned off.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "command_line", derive(arrrg_derive::CommandLine))]
pub struct CommandLineOptions {
    #[cfg_attr(feature = "command_line", arrrg(flag, "Leave %NAME% references alone."))]
    pub no_percent: bool,
    #[cfg_attr(
        feature = "command_line",
        arrrg(flag, "Leave $NAME and ${NAME} references alone.")
    )]
    pub no_dollar: bool,
    #[cfg_attr(
        feature = "command_line",
        arrrg(flag, "Copy malformed references to the output instead of failing.")
    )]
    pub lenient: bool,
    #[cfg_attr(
        feature = "command_line",
        arrrg(flag, "List the referenced variables instead of substituting.")
    )]
    pub list: bool,
}

impl From<&CommandLineOptions> for Options {
    fn from(options: &CommandLineOptions) -> Self {
        Self {
            percent: !options.no_percent,
            dollar: !options.no_dollar,
            strict: !options.lenient,
        }
    }
}

///////////////////////////////////////////// Resolver /////////////////////////////////////////////

/// A Resolver maps a variable name to its replacement.
///
/// `Ok(None)` means the variable has no value and the reference becomes the empty string.  Errors
/// returned by the resolver abort the substitution and are returned to the caller untouched, so
/// the error type must be able to carry a parse [Error] as well.
///
/// The resolver is invoked once per reference, in the order references appear.  It is expected
/// that the resolver do no substitution of its own.
pub trait Resolver {
    type Error: From<Error>;

    fn resolve(&mut self, name: &str) -> Result<Option<Cow<'_, str>>, Self::Error>;
}

impl Resolver for () {
    type Error = Error;

    fn resolve(&mut self, _: &str) -> Result<Option<Cow<'_, str>>, Error> {
        Ok(None)
    }
}

impl<K: Borrow<str> + Eq + Hash, V: AsRef<str>> Resolver for HashMap<K, V> {
    type Error = Error;

    fn resolve(&mut self, name: &str) -> Result<Option<Cow<'_, str>>, Error> {
        Ok(self.get(name).map(|v| Cow::Borrowed(v.as_ref())))
    }
}

/// Resolve variables from the environment of the current process.
///
/// Variables that are unset or not valid UTF-8 have no value.
#[derive(Clone, Copy, Debug, Default)]
pub struct Environment;

impl Resolver for Environment {
    type Error = Error;

    fn resolve(&mut self, name: &str) -> Result<Option<Cow<'_, str>>, Error> {
        if name.is_empty() || name.contains(['=', '\0']) {
            return Ok(None);
        }
        Ok(std::env::var(name).ok().map(Cow::Owned))
    }
}

/// A resolver backed by an infallible closure.  See [from_fn].
#[derive(Clone, Debug)]
pub struct FnResolver<F> {
    f: F,
}

/// Use the provided closure as a resolver.
pub fn from_fn<F: FnMut(&str) -> Option<String>>(f: F) -> FnResolver<F> {
    FnResolver { f }
}

impl<F: FnMut(&str) -> Option<String>> Resolver for FnResolver<F> {
    type Error = Error;

    fn resolve(&mut self, name: &str) -> Result<Option<Cow<'_, str>>, Error> {
        Ok((self.f)(name).map(Cow::Owned))
    }
}

/// A resolver backed by a fallible closure.  See [try_from_fn].
pub struct TryFnResolver<F, E> {
    f: F,
    _error: PhantomData<fn() -> E>,
}

/// Use the provided closure as a resolver.  Errors from the closure end the substitution and are
/// returned as-is.
pub fn try_from_fn<F, E>(f: F) -> TryFnResolver<F, E>
where
    F: FnMut(&str) -> Result<Option<String>, E>,
    E: From<Error>,
{
    TryFnResolver {
        f,
        _error: PhantomData,
    }
}

impl<F, E> Resolver for TryFnResolver<F, E>
where
    F: FnMut(&str) -> Result<Option<String>, E>,
    E: From<Error>,
{
    type Error = E;

    fn resolve(&mut self, name: &str) -> Result<Option<Cow<'_, str>>, E> {
        Ok((self.f)(name)?.map(Cow::Owned))
    }
}

// Records every name it is asked about and resolves none of them.
#[derive(Default)]
struct Witness {
    names: Vec<String>,
}

impl Resolver for Witness {
    type Error = Error;

    fn resolve(&mut self, name: &str) -> Result<Option<Cow<'_, str>>, Error> {
        if !self.names.iter().any(|n| n == name) {
            self.names.push(name.to_string());
        }
        Ok(None)
    }
}

///////////////////////////////////////// character classes ////////////////////////////////////////

const fn printable_except(reserved: &[u8]) -> [bool; 128] {
    let mut table = [false; 128];
    let mut c = 0x20;
    while c < 0x7f {
        table[c] = true;
        c += 1;
    }
    let mut i = 0;
    while i < reserved.len() {
        table[reserved[i] as usize] = false;
        i += 1;
    }
    table
}

static BRACE_SAFE: [bool; 128] = printable_except(b"}=");
static PERCENT_SAFE: [bool; 128] = printable_except(b"%=");

fn is_bare(c: char) -> bool {
    matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '_')
}

fn is_brace_safe(c: char) -> bool {
    c.is_ascii() && BRACE_SAFE[c as usize]
}

fn is_percent_safe(c: char) -> bool {
    c.is_ascii() && PERCENT_SAFE[c as usize]
}

///////////////////////////////////////////// Tokenizer ////////////////////////////////////////////

#[derive(Clone, Debug)]
struct Tokenize<'a> {
    symbols: Peekable<Enumerate<Chars<'a>>>,
}

impl<'a> Tokenize<'a> {
    fn new(input: &'a str) -> Self {
        let symbols = input.chars().enumerate().peekable();
        Tokenize { symbols }
    }

    fn next(&mut self) -> Option<(usize, char)> {
        self.symbols.next()
    }

    fn accept(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.symbols.next();
            true
        } else {
            false
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.symbols.peek().map(|x| x.1)
    }

    fn column(&mut self) -> Option<usize> {
        self.symbols.peek().map(|x| x.0)
    }
}

//////////////////////////////////////////// substitute ////////////////////////////////////////////

/// Substitute every variable reference in `input` with the value `resolver` provides for it.
///
/// Input that is not part of a reference is copied to the output unchanged.  In strict mode the
/// first malformed reference fails the whole call; in lenient mode malformed references are
/// copied to the output as written and the call cannot fail except by way of the resolver.
pub fn substitute<R: Resolver + ?Sized>(
    input: &str,
    resolver: &mut R,
    options: &Options,
) -> Result<String, R::Error> {
    SUBSTITUTE.click();
    let mut tokens = Tokenize::new(input);
    let mut output = String::with_capacity(input.len());
    while let Some((_, c)) = tokens.next() {
        match c {
            '$' if options.dollar => {
                parse_dollar(resolver, options, &mut tokens, &mut output)?;
            }
            '%' if options.percent => {
                parse_percent(resolver, options, &mut tokens, &mut output)?;
            }
            c => {
                output.push(c);
            }
        }
    }
    Ok(output)
}

/// Return the names of the variables `input` refers to, in order of first appearance.
///
/// Recognizes exactly what [substitute] recognizes under the same options, and fails where it
/// would fail.
pub fn variables(input: &str, options: &Options) -> Result<Vec<String>, Error> {
    let mut witness = Witness::default();
    substitute(input, &mut witness, options)?;
    Ok(witness.names)
}

// The leading '$' has been consumed.
fn parse_dollar<R: Resolver + ?Sized>(
    resolver: &mut R,
    options: &Options,
    tokens: &mut Tokenize,
    output: &mut String,
) -> Result<(), R::Error> {
    match tokens.peek() {
        Some('$') => {
            tokens.accept('$');
            ESCAPE.click();
            output.push('$');
            Ok(())
        }
        Some('{') => {
            let column = tokens.column().unwrap_or_default();
            tokens.accept('{');
            if tokens.accept('}') {
                return reject(options, Error::NoName { column }, "${}", output);
            }
            parse_delimited(resolver, options, tokens, output, "${", '}', is_brace_safe)
        }
        Some(c) if is_bare(c) => {
            let mut name = String::new();
            while let Some(c) = tokens.peek() {
                if !is_bare(c) {
                    break;
                }
                name.push(c);
                tokens.accept(c);
            }
            // The terminator stays in the stream for the caller to examine.
            resolve_into(resolver, &name, output)
        }
        Some(c) => {
            tokens.accept(c);
            output.push('$');
            output.push(c);
            Ok(())
        }
        None => {
            output.push('$');
            Ok(())
        }
    }
}

// The leading '%' has been consumed.
fn parse_percent<R: Resolver + ?Sized>(
    resolver: &mut R,
    options: &Options,
    tokens: &mut Tokenize,
    output: &mut String,
) -> Result<(), R::Error> {
    if tokens.accept('%') {
        ESCAPE.click();
        output.push('%');
        return Ok(());
    }
    parse_delimited(resolver, options, tokens, output, "%", '%', is_percent_safe)
}

// Scan a name up to `close`, having consumed `open`.
fn parse_delimited<R: Resolver + ?Sized>(
    resolver: &mut R,
    options: &Options,
    tokens: &mut Tokenize,
    output: &mut String,
    open: &str,
    close: char,
    is_safe: fn(char) -> bool,
) -> Result<(), R::Error> {
    let mut name = String::new();
    loop {
        match tokens.next() {
            Some((_, c)) if c == close => {
                return resolve_into(resolver, &name, output);
            }
            Some((_, c)) if is_safe(c) => {
                name.push(c);
            }
            Some((column, character)) => {
                let literal = format!("{open}{name}{character}");
                let err = Error::BadCharacter {
                    name,
                    character,
                    column,
                };
                return reject(options, err, &literal, output);
            }
            None => {
                let literal = format!("{open}{name}");
                let err = Error::UnterminatedVariable { name };
                return reject(options, err, &literal, output);
            }
        }
    }
}

fn resolve_into<R: Resolver + ?Sized>(
    resolver: &mut R,
    name: &str,
    output: &mut String,
) -> Result<(), R::Error> {
    RESOLVE.click();
    match resolver.resolve(name)? {
        Some(value) => output.push_str(&value),
        None => NO_VALUE.click(),
    }
    Ok(())
}

// Fail with `err` when strict; otherwise reproduce `literal` and carry on.
fn reject<E: From<Error>>(
    options: &Options,
    err: Error,
    literal: &str,
    output: &mut String,
) -> Result<(), E> {
    if options.strict {
        err.click();
        let message = err.to_string();
        clue!(COLLECTOR, ERROR, {
            error: message.as_str(),
        });
        Err(err.into())
    } else {
        LENIENT.click();
        clue!(COLLECTOR, INFO, {
            lenient: literal,
        });
        output.push_str(literal);
        Ok(())
    }
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////
