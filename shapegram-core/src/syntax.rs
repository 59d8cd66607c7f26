//! The shape-grammar language definition.
//!
//! Instantiates the grammar-agnostic scanner and SLR parser for the
//! concrete language:
//!
//! ```text
//! #var STORIES 3
//! #define MAX_DEPTH 6
//! %%
//! Building() [] : { T(0, 1, 0) Floor(STORIES) }
//! Floor(n) [n > 0] :
//!     (2) { PlaceShape("slab") T(0, 1, 0) Floor(n - 1) }
//!     (1) { PlaceShape("roof") }
//! ```
//!
//! An optional preamble declares `#var` globals and overrides the known
//! `#define` bounds, separated from the rules by `%%`. Each rule is
//! `NAME(args)[guard] : body`, where the body is either a single brace
//! block or one or more `(weight){ ... }` alternatives. Rule-body calls
//! are classified against the action registry: registered names become
//! builtin actions, everything else a producer reference resolved at
//! derivation time (so forward references are legal).
//!
//! Token patterns are tried in declaration order, first match wins; the
//! leading `-` belongs to number literals, so `x - 3` is subtraction while
//! `x -3` is two adjacent atoms.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::ast::{ActionRegistry, Alternative, GlobalDefines, Producer, Root, RuleTemplate};
use crate::error::{ActionError, GrammarError, LexBuildError, ParseError};
use crate::expr::{BinOp, Expr, ExprKind, VarsEnv};
use crate::grammar::{Grammar, GrammarBuilder, Sym};
use crate::parser::Parser;
use crate::scanner::{PatternDef, Scanner};
use crate::token::Token;

// ---------------------------------------------------------------------------
// Terminals
// ---------------------------------------------------------------------------

/// Terminal ids of the shape language, in pattern order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Tok {
    Ignore,
    KwVar,
    KwDefine,
    Name,
    Str,
    Number,
    Break,
    Pound,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Colon,
    Comma,
    OpCmp,
    OpPow,
    OpAdd,
    OpMul,
}

/// Terminal names used in diagnostics, indexed by [`Tok`].
const TERMINAL_NAMES: &[&str] = &[
    "whitespace",
    "`var`",
    "`define`",
    "name",
    "string",
    "number",
    "`%%`",
    "`#`",
    "`(`",
    "`)`",
    "`{`",
    "`}`",
    "`[`",
    "`]`",
    "`:`",
    "`,`",
    "comparison operator",
    "`**`",
    "`+` or `-`",
    "`*` or `/`",
];

/// The ordered pattern table. `OpPow` precedes `OpMul` so `**` can lex.
const PATTERNS: &[PatternDef] = &[
    PatternDef {
        term: Tok::Ignore as usize,
        name: "whitespace",
        pattern: r"[ \t\r\n]+|//[^\n]*",
    },
    PatternDef {
        term: Tok::KwVar as usize,
        name: "`var`",
        pattern: r"var\b",
    },
    PatternDef {
        term: Tok::KwDefine as usize,
        name: "`define`",
        pattern: r"define\b",
    },
    PatternDef {
        term: Tok::Name as usize,
        name: "name",
        pattern: r"[A-Za-z_][A-Za-z0-9_]*",
    },
    PatternDef {
        term: Tok::Str as usize,
        name: "string",
        pattern: r#""[^"]*""#,
    },
    PatternDef {
        term: Tok::Number as usize,
        name: "number",
        pattern: r"-?[0-9]+(?:\.[0-9]+)?|\.[0-9]+",
    },
    PatternDef {
        term: Tok::Break as usize,
        name: "`%%`",
        pattern: r"%%",
    },
    PatternDef {
        term: Tok::Pound as usize,
        name: "`#`",
        pattern: r"\#",
    },
    PatternDef {
        term: Tok::LParen as usize,
        name: "`(`",
        pattern: r"\(",
    },
    PatternDef {
        term: Tok::RParen as usize,
        name: "`)`",
        pattern: r"\)",
    },
    PatternDef {
        term: Tok::LBrace as usize,
        name: "`{`",
        pattern: r"\{",
    },
    PatternDef {
        term: Tok::RBrace as usize,
        name: "`}`",
        pattern: r"\}",
    },
    PatternDef {
        term: Tok::LBracket as usize,
        name: "`[`",
        pattern: r"\[",
    },
    PatternDef {
        term: Tok::RBracket as usize,
        name: "`]`",
        pattern: r"\]",
    },
    PatternDef {
        term: Tok::Colon as usize,
        name: "`:`",
        pattern: r":",
    },
    PatternDef {
        term: Tok::Comma as usize,
        name: "`,`",
        pattern: r",",
    },
    PatternDef {
        term: Tok::OpCmp as usize,
        name: "comparison operator",
        pattern: r"==|!=|<=|>=|<|>",
    },
    PatternDef {
        term: Tok::OpPow as usize,
        name: "`**`",
        pattern: r"\*\*",
    },
    PatternDef {
        term: Tok::OpAdd as usize,
        name: "`+` or `-`",
        pattern: r"[+-]",
    },
    PatternDef {
        term: Tok::OpMul as usize,
        name: "`*` or `/`",
        pattern: r"[*/]",
    },
];

const fn t(tok: Tok) -> Sym {
    Sym::Term(tok as usize)
}

// ---------------------------------------------------------------------------
// Semantic values
// ---------------------------------------------------------------------------

/// The value flowing through reductions, one variant per kind of
/// intermediate result.
#[derive(Debug, Clone)]
enum SemValue {
    Tok(Token),
    Expr(Expr),
    ExprList(Vec<Expr>),
    Args(Vec<String>),
    Rule(RuleTemplate),
    Rules(Vec<RuleTemplate>),
    Alts(Vec<Alternative>),
    Producer(Producer),
    Producers(Vec<Producer>),
    Unit,
}

impl SemValue {
    fn into_token(self) -> Result<Token, ActionError> {
        match self {
            Self::Tok(t) => Ok(t),
            other => Err(internal("token", &other)),
        }
    }

    fn into_expr(self) -> Result<Expr, ActionError> {
        match self {
            Self::Expr(e) => Ok(e),
            other => Err(internal("expression", &other)),
        }
    }

    fn into_expr_list(self) -> Result<Vec<Expr>, ActionError> {
        match self {
            Self::ExprList(l) => Ok(l),
            other => Err(internal("expression list", &other)),
        }
    }

    fn into_args(self) -> Result<Vec<String>, ActionError> {
        match self {
            Self::Args(a) => Ok(a),
            other => Err(internal("argument list", &other)),
        }
    }

    fn into_rule(self) -> Result<RuleTemplate, ActionError> {
        match self {
            Self::Rule(r) => Ok(r),
            other => Err(internal("rule", &other)),
        }
    }

    fn into_rules(self) -> Result<Vec<RuleTemplate>, ActionError> {
        match self {
            Self::Rules(r) => Ok(r),
            other => Err(internal("rule list", &other)),
        }
    }

    fn into_alts(self) -> Result<Vec<Alternative>, ActionError> {
        match self {
            Self::Alts(a) => Ok(a),
            other => Err(internal("alternative list", &other)),
        }
    }

    fn into_producer(self) -> Result<Producer, ActionError> {
        match self {
            Self::Producer(p) => Ok(p),
            other => Err(internal("producer", &other)),
        }
    }

    fn into_producers(self) -> Result<Vec<Producer>, ActionError> {
        match self {
            Self::Producers(p) => Ok(p),
            other => Err(internal("producer list", &other)),
        }
    }
}

fn internal(expected: &str, found: &SemValue) -> ActionError {
    ActionError::new(format!(
        "internal parser error: expected {expected}, found {found:?}"
    ))
}

/// Take the value at `i`, leaving `Unit` behind (indices stay stable).
fn take(values: &mut [SemValue], i: usize) -> SemValue {
    std::mem::replace(&mut values[i], SemValue::Unit)
}

// ---------------------------------------------------------------------------
// Compile context
// ---------------------------------------------------------------------------

/// Mutable state shared by semantic actions during one compile.
struct CompileCtx {
    registry: ActionRegistry,
    variables: HashMap<String, Expr>,
    defines: GlobalDefines,
}

impl CompileCtx {
    fn new() -> Self {
        Self {
            registry: ActionRegistry::builtin(),
            variables: HashMap::new(),
            defines: GlobalDefines::default(),
        }
    }

    /// Whether `name` is already bound in any compile-time namespace.
    fn name_exists(&self, name: &str) -> bool {
        self.variables.contains_key(name)
            || GlobalDefines::is_known(name)
            || self.registry.get(name).is_some()
    }
}

// ---------------------------------------------------------------------------
// Grammar definition
// ---------------------------------------------------------------------------

fn build_grammar() -> Grammar<SemValue, CompileCtx> {
    let mut b: GrammarBuilder<SemValue, CompileCtx> =
        GrammarBuilder::new(TERMINAL_NAMES, |tok| SemValue::Tok(tok.clone()));

    let start = b.nonterminal("Start");
    let var_def_list = b.nonterminal("VarDefList");
    let var_def = b.nonterminal("VarDef");
    let prod_rule_list = b.nonterminal("ProdRuleList");
    let prod_rule = b.nonterminal("ProdRule");
    let arg_list = b.nonterminal("ArgList");
    let alt_list = b.nonterminal("AltList");
    let gen_rule_list = b.nonterminal("GenRuleList");
    let gen_rule = b.nonterminal("GenRule");
    let exp_list = b.nonterminal("ExpList");
    let exp0 = b.nonterminal("Exp0");
    let exp1 = b.nonterminal("Exp1");
    let exp2 = b.nonterminal("Exp2");
    let exp3 = b.nonterminal("Exp3");
    let exp4 = b.nonterminal("Exp4");

    // Start
    b.production(start, vec![Sym::NonTerm(prod_rule_list)], |_, mut v| {
        Ok(take(&mut v, 0))
    });
    b.production(
        start,
        vec![
            Sym::NonTerm(var_def_list),
            t(Tok::Break),
            Sym::NonTerm(prod_rule_list),
        ],
        |_, mut v| Ok(take(&mut v, 2)),
    );

    // Preamble
    b.production(var_def_list, vec![Sym::NonTerm(var_def)], |_, _| {
        Ok(SemValue::Unit)
    });
    b.production(
        var_def_list,
        vec![Sym::NonTerm(var_def_list), Sym::NonTerm(var_def)],
        |_, _| Ok(SemValue::Unit),
    );

    b.production(
        var_def,
        vec![t(Tok::Pound), t(Tok::KwVar), t(Tok::Name), Sym::NonTerm(exp0)],
        |ctx, mut v| {
            let name = take(&mut v, 2).into_token()?.text;
            let expr = take(&mut v, 3).into_expr()?;
            if ctx.name_exists(&name) {
                return Err(ActionError::new(format!("name already defined: {name}")));
            }
            ctx.variables.insert(name, expr);
            Ok(SemValue::Unit)
        },
    );
    b.production(
        var_def,
        vec![
            t(Tok::Pound),
            t(Tok::KwDefine),
            t(Tok::Name),
            Sym::NonTerm(exp0),
        ],
        |ctx, mut v| {
            let name = take(&mut v, 2).into_token()?.text;
            let expr = take(&mut v, 3).into_expr()?;
            let value = {
                let env = VarsEnv::new(&ctx.variables);
                expr.eval(&env)
                    .and_then(|val| val.as_number())
                    .map_err(|e| ActionError::new(format!("in #define {name}: {e}")))?
            };
            if !ctx.defines.set(&name, value) {
                log::warn!("global definition not found: {name}");
            }
            Ok(SemValue::Unit)
        },
    );

    // Rule lists
    b.production(prod_rule_list, vec![Sym::NonTerm(prod_rule)], |_, mut v| {
        let p = take(&mut v, 0).into_producer()?;
        Ok(SemValue::Producers(vec![p]))
    });
    b.production(
        prod_rule_list,
        vec![Sym::NonTerm(prod_rule_list), Sym::NonTerm(prod_rule)],
        |_, mut v| {
            let mut list = take(&mut v, 0).into_producers()?;
            let p = take(&mut v, 1).into_producer()?;
            if list.iter().any(|q| q.name == p.name) {
                return Err(ActionError::new(format!("name already defined: {}", p.name)));
            }
            list.push(p);
            Ok(SemValue::Producers(list))
        },
    );

    // The rule shapes: (args?) x (guard spelling) x (single body | alternatives)
    add_prod_rule_productions(&mut b, prod_rule, arg_list, alt_list, gen_rule_list, exp0);

    // Argument declarations
    b.production(arg_list, vec![t(Tok::Name)], |_, mut v| {
        let name = take(&mut v, 0).into_token()?.text;
        Ok(SemValue::Args(vec![name]))
    });
    b.production(
        arg_list,
        vec![Sym::NonTerm(arg_list), t(Tok::Comma), t(Tok::Name)],
        |_, mut v| {
            let mut args = take(&mut v, 0).into_args()?;
            args.push(take(&mut v, 2).into_token()?.text);
            Ok(SemValue::Args(args))
        },
    );

    // Weighted alternatives
    b.production(
        alt_list,
        vec![
            t(Tok::LParen),
            Sym::NonTerm(exp0),
            t(Tok::RParen),
            t(Tok::LBrace),
            Sym::NonTerm(gen_rule_list),
            t(Tok::RBrace),
        ],
        |_, mut v| {
            let alt = Alternative {
                weight: Some(take(&mut v, 1).into_expr()?),
                body: take(&mut v, 4).into_rules()?,
            };
            Ok(SemValue::Alts(vec![alt]))
        },
    );
    b.production(
        alt_list,
        vec![
            t(Tok::LParen),
            Sym::NonTerm(exp0),
            t(Tok::RParen),
            t(Tok::LBrace),
            Sym::NonTerm(gen_rule_list),
            t(Tok::RBrace),
            Sym::NonTerm(alt_list),
        ],
        |_, mut v| {
            let alt = Alternative {
                weight: Some(take(&mut v, 1).into_expr()?),
                body: take(&mut v, 4).into_rules()?,
            };
            let mut rest = take(&mut v, 6).into_alts()?;
            rest.insert(0, alt);
            Ok(SemValue::Alts(rest))
        },
    );

    // Rule bodies
    b.production(gen_rule_list, vec![Sym::NonTerm(gen_rule)], |_, mut v| {
        let rule = take(&mut v, 0).into_rule()?;
        Ok(SemValue::Rules(vec![rule]))
    });
    b.production(
        gen_rule_list,
        vec![Sym::NonTerm(gen_rule), Sym::NonTerm(gen_rule_list)],
        |_, mut v| {
            let rule = take(&mut v, 0).into_rule()?;
            let mut rest = take(&mut v, 1).into_rules()?;
            rest.insert(0, rule);
            Ok(SemValue::Rules(rest))
        },
    );

    b.production(
        gen_rule,
        vec![t(Tok::Name), t(Tok::LParen), t(Tok::RParen)],
        |ctx, mut v| {
            let name = take(&mut v, 0).into_token()?.text;
            Ok(SemValue::Rule(classify_call(ctx, name, Vec::new())))
        },
    );
    b.production(
        gen_rule,
        vec![
            t(Tok::Name),
            t(Tok::LParen),
            Sym::NonTerm(exp_list),
            t(Tok::RParen),
        ],
        |ctx, mut v| {
            let name = take(&mut v, 0).into_token()?.text;
            let params = take(&mut v, 2).into_expr_list()?;
            Ok(SemValue::Rule(classify_call(ctx, name, params)))
        },
    );

    // Expression lists
    b.production(exp_list, vec![Sym::NonTerm(exp0)], |_, mut v| {
        let e = take(&mut v, 0).into_expr()?;
        Ok(SemValue::ExprList(vec![e]))
    });
    b.production(
        exp_list,
        vec![Sym::NonTerm(exp_list), t(Tok::Comma), Sym::NonTerm(exp0)],
        |_, mut v| {
            let mut list = take(&mut v, 0).into_expr_list()?;
            list.push(take(&mut v, 2).into_expr()?);
            Ok(SemValue::ExprList(list))
        },
    );

    // Tiered expressions, lowest precedence first
    for (lower, op_tok, higher) in [
        (exp0, Tok::OpCmp, exp1),
        (exp1, Tok::OpAdd, exp2),
        (exp2, Tok::OpMul, exp3),
        (exp3, Tok::OpPow, exp4),
    ] {
        b.production(
            lower,
            vec![Sym::NonTerm(lower), t(op_tok), Sym::NonTerm(higher)],
            binary_action,
        );
        b.production(lower, vec![Sym::NonTerm(higher)], |_, mut v| {
            Ok(take(&mut v, 0))
        });
    }

    // Primary expressions
    b.production(
        exp4,
        vec![t(Tok::LParen), Sym::NonTerm(exp0), t(Tok::RParen)],
        |_, mut v| Ok(take(&mut v, 1)),
    );
    b.production(exp4, vec![t(Tok::Number)], |_, mut v| {
        let tok = take(&mut v, 0).into_token()?;
        let n: f64 = tok
            .text
            .parse()
            .map_err(|_| ActionError::new(format!("invalid number: {}", tok.text)))?;
        Ok(SemValue::Expr(Expr::new(ExprKind::Number(n), tok.span)))
    });
    b.production(exp4, vec![t(Tok::Name)], |_, mut v| {
        let tok = take(&mut v, 0).into_token()?;
        let kind = match tok.text.as_str() {
            "True" => ExprKind::Bool(true),
            "False" => ExprKind::Bool(false),
            _ => ExprKind::Var(tok.text),
        };
        Ok(SemValue::Expr(Expr::new(kind, tok.span)))
    });
    b.production(exp4, vec![t(Tok::Str)], |_, mut v| {
        let tok = take(&mut v, 0).into_token()?;
        // strip the surrounding quotes
        let inner = tok.text[1..tok.text.len() - 1].to_owned();
        Ok(SemValue::Expr(Expr::new(ExprKind::Str(inner), tok.span)))
    });

    b.build(start)
}

/// Shared action for all four binary-operator tiers.
fn binary_action(_: &mut CompileCtx, mut v: Vec<SemValue>) -> Result<SemValue, ActionError> {
    let lhs = take(&mut v, 0).into_expr()?;
    let op_tok = take(&mut v, 1).into_token()?;
    let rhs = take(&mut v, 2).into_expr()?;
    let op = BinOp::from_symbol(&op_tok.text)
        .ok_or_else(|| ActionError::new(format!("unknown operator: {}", op_tok.text)))?;
    Ok(SemValue::Expr(Expr::binary(op, lhs, rhs)))
}

/// A rule-body call is an action if its name is registered, otherwise a
/// reference to a producer (resolved at derivation time).
fn classify_call(ctx: &CompileCtx, name: String, params: Vec<Expr>) -> RuleTemplate {
    match ctx.registry.get(&name) {
        Some(action) => RuleTemplate::Action {
            action,
            name,
            params,
        },
        None => RuleTemplate::ProdRef { name, args: params },
    }
}

/// How a rule spells its guard: absent, empty brackets, or a condition.
#[derive(Clone, Copy)]
enum GuardForm {
    None,
    Empty,
    Cond,
}

/// Install the twelve `ProdRule` shapes:
/// `NAME ( [args] ) [ "[" [guard] "]" ] : ({ body } | alternatives)`.
fn add_prod_rule_productions(
    b: &mut GrammarBuilder<SemValue, CompileCtx>,
    prod_rule: usize,
    arg_list: usize,
    alt_list: usize,
    gen_rule_list: usize,
    exp0: usize,
) {
    struct Shape {
        args: bool,
        guard: GuardForm,
        multi: bool,
    }

    let mut shapes = Vec::new();
    for guard in [GuardForm::None, GuardForm::Empty, GuardForm::Cond] {
        for args in [false, true] {
            for multi in [false, true] {
                shapes.push(Shape { args, guard, multi });
            }
        }
    }

    for shape in shapes {
        let mut rhs = vec![t(Tok::Name), t(Tok::LParen)];
        let mut args_at = None;
        if shape.args {
            args_at = Some(rhs.len());
            rhs.push(Sym::NonTerm(arg_list));
        }
        rhs.push(t(Tok::RParen));
        let mut guard_at = None;
        match shape.guard {
            GuardForm::None => {}
            GuardForm::Empty => {
                rhs.push(t(Tok::LBracket));
                rhs.push(t(Tok::RBracket));
            }
            GuardForm::Cond => {
                rhs.push(t(Tok::LBracket));
                guard_at = Some(rhs.len());
                rhs.push(Sym::NonTerm(exp0));
                rhs.push(t(Tok::RBracket));
            }
        }
        rhs.push(t(Tok::Colon));
        let body_at;
        if shape.multi {
            body_at = rhs.len();
            rhs.push(Sym::NonTerm(alt_list));
        } else {
            rhs.push(t(Tok::LBrace));
            body_at = rhs.len();
            rhs.push(Sym::NonTerm(gen_rule_list));
            rhs.push(t(Tok::RBrace));
        }

        let multi = shape.multi;
        b.production(prod_rule, rhs, move |_, mut v| {
            let name = take(&mut v, 0).into_token()?.text;
            let params = match args_at {
                Some(i) => take(&mut v, i).into_args()?,
                None => Vec::new(),
            };
            let guard = match guard_at {
                Some(i) => Some(take(&mut v, i).into_expr()?),
                None => None,
            };
            let alternatives = if multi {
                take(&mut v, body_at).into_alts()?
            } else {
                vec![Alternative {
                    weight: None,
                    body: take(&mut v, body_at).into_rules()?,
                }]
            };
            Ok(SemValue::Producer(Producer {
                name,
                params,
                guard,
                alternatives,
            }))
        });
    }
}

// ---------------------------------------------------------------------------
// Compile entry point
// ---------------------------------------------------------------------------

static SCANNER: Lazy<Result<Scanner, LexBuildError>> =
    Lazy::new(|| Scanner::new(PATTERNS, Some(Tok::Ignore as usize)));

static LANGUAGE: Lazy<Result<Parser<SemValue, CompileCtx>, Vec<GrammarError>>> =
    Lazy::new(|| Parser::compile(build_grammar()));

/// Compile grammar source text into a [`Root`].
///
/// All compile-time failures — lexical, syntactic, and semantic — are
/// returned as a list of line-annotated [`ParseError`]s.
pub fn compile(source: &str) -> Result<Root, Vec<ParseError>> {
    let scanner = SCANNER
        .as_ref()
        .map_err(|e| vec![ParseError::new(0, e.to_string())])?;
    let parser = LANGUAGE.as_ref().map_err(|errs| {
        errs.iter()
            .map(|e| ParseError::new(0, e.to_string()))
            .collect::<Vec<_>>()
    })?;

    let tokens = scanner.scan(source).map_err(|e| {
        vec![ParseError::new(
            e.line,
            format!("unrecognized character at byte {}", e.span.start),
        )]
    })?;

    let mut ctx = CompileCtx::new();
    let value = parser.parse(&tokens, source, &mut ctx)?;
    let producers = value
        .into_producers()
        .map_err(|e| vec![ParseError::new(0, e.message)])?;

    log::debug!(
        "compiled {} producer(s), {} variable(s)",
        producers.len(),
        ctx.variables.len()
    );

    Root::build(producers, ctx.variables, ctx.defines)
        .map_err(|message| vec![ParseError::new(0, message)])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
