//! SLR(1) parser generator and shift-reduce driver.
//!
//! [`Parser::compile`] turns a [`Grammar`] into ACTION/GOTO tables via the
//! canonical LR(0) item-set construction with SLR lookaheads (reduce on
//! FOLLOW). Table defects — shift/reduce or reduce/reduce conflicts,
//! unreachable nonterminals, nonterminals without productions — are all
//! collected and reported together as [`GrammarError`]s.
//!
//! [`Parser::parse`] is a deterministic bottom-up reduction with no
//! backtracking: semantic actions run as their productions reduce, building
//! the result value on the stack. A syntax error aborts the parse with a
//! line-annotated [`ParseError`].

use std::collections::{BTreeSet, HashMap};

use crate::error::{GrammarError, ParseError};
use crate::grammar::{Grammar, NonTermId, Sym};
use crate::token::{line_at, Span, TermId, Token};

type StateId = usize;
type ProdId = usize;

// ---------------------------------------------------------------------------
// Table entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActionEntry {
    Err,
    Shift(StateId),
    Reduce(ProdId),
    Accept,
}

impl ActionEntry {
    fn describe(self) -> String {
        match self {
            Self::Err => "error".to_owned(),
            Self::Shift(s) => format!("shift({s})"),
            Self::Reduce(p) => format!("reduce({p})"),
            Self::Accept => "accept".to_owned(),
        }
    }
}

/// An LR(0) item: a production with a dot position.
///
/// `prod == n` (one past the last grammar production) denotes the
/// augmented start production `S' → start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct Item {
    prod: ProdId,
    dot: usize,
}

type ItemSet = BTreeSet<Item>;

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// A compiled SLR(1) parser.
pub struct Parser<V, C> {
    grammar: Grammar<V, C>,
    /// `actions[state][terminal]`; index `n_terms` is end-of-input.
    actions: Vec<Vec<ActionEntry>>,
    /// `gotos[state][nonterminal]`.
    gotos: Vec<Vec<Option<StateId>>>,
}

impl<V, C> Parser<V, C> {
    /// Compile the grammar into parse tables.
    ///
    /// Returns every table defect at once if the grammar is ambiguous or
    /// contains unreachable or production-less nonterminals.
    pub fn compile(grammar: Grammar<V, C>) -> Result<Self, Vec<GrammarError>> {
        let builder = TableBuilder::new(&grammar);
        let (actions, gotos, errors) = builder.build();
        if errors.is_empty() {
            Ok(Self {
                grammar,
                actions,
                gotos,
            })
        } else {
            Err(errors)
        }
    }

    /// Parse a token stream, running semantic actions against `ctx`.
    ///
    /// `source` is the original text, used only for error line numbers.
    pub fn parse(
        &self,
        tokens: &[Token],
        source: &str,
        ctx: &mut C,
    ) -> Result<V, Vec<ParseError>> {
        let eof = self.grammar.terminals.len();
        let mut states: Vec<StateId> = vec![0];
        let mut values: Vec<V> = Vec::new();
        // Spans of the values, kept in lockstep so reduction errors point
        // at the reduced production rather than the lookahead token
        let mut spans: Vec<Span> = Vec::new();
        let mut i = 0;

        loop {
            let state = states.last().copied().unwrap_or(0);
            let (term, line) = match tokens.get(i) {
                Some(tok) => (tok.term, line_at(source, tok.span.start)),
                None => (eof, line_at(source, source.len())),
            };

            match self.actions[state][term] {
                ActionEntry::Shift(next) => {
                    // tokens.get(i) was Some, or term would be eof (never shifted)
                    if let Some(tok) = tokens.get(i) {
                        values.push((self.grammar.token_value)(tok));
                        spans.push(tok.span);
                    }
                    states.push(next);
                    i += 1;
                }
                ActionEntry::Reduce(p) => {
                    let prod = &self.grammar.productions[p];
                    let n = prod.rhs.len();
                    let args = values.split_off(values.len() - n);
                    let arg_spans = spans.split_off(spans.len() - n);
                    states.truncate(states.len() - n);
                    let reduced_span = match (arg_spans.first(), arg_spans.last()) {
                        (Some(first), Some(last)) => Span::new(first.start, last.end),
                        _ => tokens.get(i).map_or(Span::at(source.len()), |t| t.span),
                    };
                    let value = (prod.action)(ctx, args).map_err(|e| {
                        vec![ParseError::new(
                            line_at(source, reduced_span.start),
                            e.message,
                        )]
                    })?;
                    let top = states.last().copied().unwrap_or(0);
                    match self.gotos[top][prod.lhs] {
                        Some(next) => {
                            values.push(value);
                            spans.push(reduced_span);
                            states.push(next);
                        }
                        None => {
                            return Err(vec![ParseError::new(
                                line,
                                format!(
                                    "internal parser error: no goto for `{}`",
                                    self.grammar.nonterminal_name(prod.lhs)
                                ),
                            )]);
                        }
                    }
                }
                ActionEntry::Accept => {
                    return values.pop().map_or_else(
                        || {
                            Err(vec![ParseError::new(
                                line,
                                "internal parser error: empty value stack on accept",
                            )])
                        },
                        Ok,
                    );
                }
                ActionEntry::Err => {
                    let found = tokens
                        .get(i)
                        .map_or_else(|| "end of input".to_owned(), |t| format!("`{}`", t.text));
                    return Err(vec![ParseError::new(
                        line,
                        format!(
                            "unexpected {found}, expected one of: {}",
                            self.expected_at(state)
                        ),
                    )]);
                }
            }
        }
    }

    /// Comma-separated list of terminals acceptable in `state`.
    fn expected_at(&self, state: StateId) -> String {
        let eof = self.grammar.terminals.len();
        let names: Vec<&str> = self.actions[state]
            .iter()
            .enumerate()
            .filter(|(_, entry)| **entry != ActionEntry::Err)
            .map(|(t, _)| {
                if t == eof {
                    "end of input"
                } else {
                    self.grammar.terminal_name(t)
                }
            })
            .collect();
        names.join(", ")
    }
}

// ---------------------------------------------------------------------------
// Table construction
// ---------------------------------------------------------------------------

/// Transient state for the SLR table construction.
struct TableBuilder<'g, V, C> {
    grammar: &'g Grammar<V, C>,
    n_terms: usize,
    n_nts: usize,
    /// Id of the augmented start production.
    aug: ProdId,
}

impl<'g, V, C> TableBuilder<'g, V, C> {
    fn new(grammar: &'g Grammar<V, C>) -> Self {
        Self {
            grammar,
            n_terms: grammar.terminals.len(),
            n_nts: grammar.nonterminals.len(),
            aug: grammar.productions.len(),
        }
    }

    /// Left-hand side of a production (augmented included).
    fn lhs(&self, p: ProdId) -> NonTermId {
        if p == self.aug {
            self.n_nts
        } else {
            self.grammar.productions[p].lhs
        }
    }

    /// Right-hand side of a production (augmented included).
    fn rhs(&self, p: ProdId) -> &[Sym] {
        if p == self.aug {
            std::slice::from_ref(&AUG_RHS_PLACEHOLDER)
        } else {
            &self.grammar.productions[p].rhs
        }
    }

    /// Symbol after the dot, with the augmented production mapped to the
    /// real start nonterminal.
    fn sym_after_dot(&self, item: Item) -> Option<Sym> {
        let rhs = self.rhs(item.prod);
        if item.dot >= rhs.len() {
            return None;
        }
        if item.prod == self.aug {
            Some(Sym::NonTerm(self.grammar.start))
        } else {
            Some(rhs[item.dot])
        }
    }

    fn build(
        &self,
    ) -> (
        Vec<Vec<ActionEntry>>,
        Vec<Vec<Option<StateId>>>,
        Vec<GrammarError>,
    ) {
        let mut errors = self.structural_errors();

        let (nullable, first) = self.first_sets();
        let follow = self.follow_sets(&nullable, &first);
        let (states, transitions) = self.item_sets();

        let mut actions = vec![vec![ActionEntry::Err; self.n_terms + 1]; states.len()];
        let mut gotos = vec![vec![None; self.n_nts]; states.len()];

        // Shifts and gotos from the transition map
        for (&(from, sym), &to) in &transitions {
            match sym {
                Sym::Term(t) => actions[from][t] = ActionEntry::Shift(to),
                Sym::NonTerm(nt) => gotos[from][nt] = Some(to),
            }
        }

        // Reduces and accept
        for (s, set) in states.iter().enumerate() {
            for item in set {
                if self.sym_after_dot(*item).is_some() {
                    continue;
                }
                if item.prod == self.aug {
                    self.set_action(&mut actions, &mut errors, s, self.n_terms, ActionEntry::Accept);
                    continue;
                }
                let lhs = self.lhs(item.prod);
                for &t in &follow[lhs] {
                    self.set_action(&mut actions, &mut errors, s, t, ActionEntry::Reduce(item.prod));
                }
            }
        }

        (actions, gotos, errors)
    }

    /// Install an action entry, recording a conflict if the cell is taken.
    fn set_action(
        &self,
        actions: &mut [Vec<ActionEntry>],
        errors: &mut Vec<GrammarError>,
        state: StateId,
        term: usize,
        entry: ActionEntry,
    ) {
        let cell = &mut actions[state][term];
        if *cell == ActionEntry::Err {
            *cell = entry;
        } else if *cell != entry {
            let terminal = if term == self.n_terms {
                "end of input".to_owned()
            } else {
                self.grammar.terminal_name(term).to_owned()
            };
            errors.push(GrammarError::Conflict {
                state,
                terminal,
                existing: cell.describe(),
                incoming: entry.describe(),
            });
        }
    }

    /// Nonterminals without productions, and nonterminals unreachable from
    /// the start symbol.
    fn structural_errors(&self) -> Vec<GrammarError> {
        let mut errors = Vec::new();

        let mut has_prods = vec![false; self.n_nts];
        for p in &self.grammar.productions {
            has_prods[p.lhs] = true;
        }
        for (nt, has) in has_prods.iter().enumerate() {
            if !has {
                errors.push(GrammarError::NoProductions {
                    name: self.grammar.nonterminal_name(nt).to_owned(),
                });
            }
        }

        let mut reachable = vec![false; self.n_nts];
        let mut work = vec![self.grammar.start];
        reachable[self.grammar.start] = true;
        while let Some(nt) = work.pop() {
            for p in &self.grammar.productions {
                if p.lhs != nt {
                    continue;
                }
                for sym in &p.rhs {
                    if let Sym::NonTerm(other) = sym {
                        if !reachable[*other] {
                            reachable[*other] = true;
                            work.push(*other);
                        }
                    }
                }
            }
        }
        for (nt, ok) in reachable.iter().enumerate() {
            if !ok {
                errors.push(GrammarError::Unreachable {
                    name: self.grammar.nonterminal_name(nt).to_owned(),
                });
            }
        }

        errors
    }

    /// Nullable flags and FIRST sets for every nonterminal.
    fn first_sets(&self) -> (Vec<bool>, Vec<BTreeSet<TermId>>) {
        let mut nullable = vec![false; self.n_nts];
        let mut first: Vec<BTreeSet<TermId>> = vec![BTreeSet::new(); self.n_nts];

        let mut changed = true;
        while changed {
            changed = false;
            for p in &self.grammar.productions {
                let mut all_nullable = true;
                for sym in &p.rhs {
                    match sym {
                        Sym::Term(t) => {
                            if first[p.lhs].insert(*t) {
                                changed = true;
                            }
                            all_nullable = false;
                        }
                        Sym::NonTerm(nt) => {
                            let add: Vec<TermId> = first[*nt].iter().copied().collect();
                            for t in add {
                                if first[p.lhs].insert(t) {
                                    changed = true;
                                }
                            }
                            if !nullable[*nt] {
                                all_nullable = false;
                            }
                        }
                    }
                    if !all_nullable {
                        break;
                    }
                }
                if all_nullable && !nullable[p.lhs] {
                    nullable[p.lhs] = true;
                    changed = true;
                }
            }
        }

        (nullable, first)
    }

    /// FOLLOW sets over terminals plus the end-of-input marker
    /// (index `n_terms`). The augmented start contributes end-of-input to
    /// the real start symbol. Indexed by nonterminal, with one extra row
    /// for the augmented symbol.
    fn follow_sets(
        &self,
        nullable: &[bool],
        first: &[BTreeSet<TermId>],
    ) -> Vec<BTreeSet<usize>> {
        let mut follow: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); self.n_nts + 1];
        follow[self.grammar.start].insert(self.n_terms);

        let mut changed = true;
        while changed {
            changed = false;
            for p in &self.grammar.productions {
                for (i, sym) in p.rhs.iter().enumerate() {
                    let Sym::NonTerm(nt) = sym else { continue };

                    // FIRST of the tail after position i
                    let mut tail_nullable = true;
                    for rest in &p.rhs[i + 1..] {
                        match rest {
                            Sym::Term(t) => {
                                if follow[*nt].insert(*t) {
                                    changed = true;
                                }
                                tail_nullable = false;
                            }
                            Sym::NonTerm(other) => {
                                let add: Vec<TermId> = first[*other].iter().copied().collect();
                                for t in add {
                                    if follow[*nt].insert(t) {
                                        changed = true;
                                    }
                                }
                                if !nullable[*other] {
                                    tail_nullable = false;
                                }
                            }
                        }
                        if !tail_nullable {
                            break;
                        }
                    }

                    // Nullable tail: FOLLOW(lhs) flows into FOLLOW(nt)
                    if tail_nullable {
                        let add: Vec<usize> = follow[p.lhs].iter().copied().collect();
                        for t in add {
                            if follow[*nt].insert(t) {
                                changed = true;
                            }
                        }
                    }
                }
            }
        }

        follow
    }

    /// Canonical LR(0) item-set collection and the transition map.
    #[allow(clippy::type_complexity)]
    fn item_sets(&self) -> (Vec<ItemSet>, HashMap<(StateId, Sym), StateId>) {
        let start_set = self.closure([Item {
            prod: self.aug,
            dot: 0,
        }]
        .into());

        let mut states: Vec<ItemSet> = vec![start_set.clone()];
        let mut index: HashMap<ItemSet, StateId> = HashMap::new();
        index.insert(start_set, 0);

        let mut transitions: HashMap<(StateId, Sym), StateId> = HashMap::new();
        let mut work: Vec<StateId> = vec![0];

        while let Some(s) = work.pop() {
            // Group kernel items of successor sets by the transition symbol
            let mut by_sym: HashMap<Sym, ItemSet> = HashMap::new();
            for item in &states[s] {
                if let Some(sym) = self.sym_after_dot(*item) {
                    by_sym.entry(sym).or_default().insert(Item {
                        prod: item.prod,
                        dot: item.dot + 1,
                    });
                }
            }

            // Deterministic iteration order for reproducible state numbering
            let mut syms: Vec<Sym> = by_sym.keys().copied().collect();
            syms.sort_by_key(|s| match s {
                Sym::Term(t) => (0, *t),
                Sym::NonTerm(nt) => (1, *nt),
            });

            for sym in syms {
                let kernel = by_sym.remove(&sym).unwrap_or_default();
                let set = self.closure(kernel);
                let to = match index.get(&set) {
                    Some(&id) => id,
                    None => {
                        let id = states.len();
                        states.push(set.clone());
                        index.insert(set, id);
                        work.push(id);
                        id
                    }
                };
                transitions.insert((s, sym), to);
            }
        }

        (states, transitions)
    }

    /// LR(0) closure of an item set.
    fn closure(&self, mut set: ItemSet) -> ItemSet {
        let mut work: Vec<Item> = set.iter().copied().collect();
        while let Some(item) = work.pop() {
            let Some(Sym::NonTerm(nt)) = self.sym_after_dot(item) else {
                continue;
            };
            for (p, prod) in self.grammar.productions.iter().enumerate() {
                if prod.lhs == nt {
                    let new = Item { prod: p, dot: 0 };
                    if set.insert(new) {
                        work.push(new);
                    }
                }
            }
        }
        set
    }
}

/// Placeholder right-hand side for the augmented production; the actual
/// symbol is substituted in [`TableBuilder::sym_after_dot`].
const AUG_RHS_PLACEHOLDER: Sym = Sym::NonTerm(usize::MAX);

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::GrammarBuilder;
    use crate::scanner::{PatternDef, Scanner};

    const WS: usize = 0;
    const NUM: usize = 1;
    const PLUS: usize = 2;
    const STAR: usize = 3;
    const LP: usize = 4;
    const RP: usize = 5;

    fn scanner() -> Scanner {
        Scanner::new(
            &[
                PatternDef { term: WS, name: "Ws", pattern: r"\s+" },
                PatternDef { term: NUM, name: "Num", pattern: r"[0-9]+" },
                PatternDef { term: PLUS, name: "Plus", pattern: r"\+" },
                PatternDef { term: STAR, name: "Star", pattern: r"\*" },
                PatternDef { term: LP, name: "LParen", pattern: r"\(" },
                PatternDef { term: RP, name: "RParen", pattern: r"\)" },
            ],
            Some(WS),
        )
        .unwrap()
    }

    const TERMS: &[&str] = &["Ws", "Num", "Plus", "Star", "LParen", "RParen"];

    /// The classic expression grammar: E → E + T | T, T → T * F | F,
    /// F → ( E ) | Num. Semantic actions fold to an i64.
    fn arith() -> Parser<i64, ()> {
        let mut b: GrammarBuilder<i64, ()> =
            GrammarBuilder::new(TERMS, |tok| tok.text.parse().unwrap_or(0));
        let e = b.nonterminal("E");
        let t = b.nonterminal("T");
        let f = b.nonterminal("F");

        b.production(e, vec![Sym::NonTerm(e), Sym::Term(PLUS), Sym::NonTerm(t)], |_, v| {
            Ok(v[0] + v[2])
        });
        b.production(e, vec![Sym::NonTerm(t)], |_, mut v| Ok(v.remove(0)));
        b.production(t, vec![Sym::NonTerm(t), Sym::Term(STAR), Sym::NonTerm(f)], |_, v| {
            Ok(v[0] * v[2])
        });
        b.production(t, vec![Sym::NonTerm(f)], |_, mut v| Ok(v.remove(0)));
        b.production(f, vec![Sym::Term(LP), Sym::NonTerm(e), Sym::Term(RP)], |_, mut v| {
            Ok(v.remove(1))
        });
        b.production(f, vec![Sym::Term(NUM)], |_, mut v| Ok(v.remove(0)));

        Parser::compile(b.build(e)).expect("arith grammar is SLR(1)")
    }

    fn eval(input: &str) -> Result<i64, Vec<ParseError>> {
        let tokens = scanner().scan(input).unwrap();
        arith().parse(&tokens, input, &mut ())
    }

    // -- parsing --

    #[test]
    fn single_number() {
        assert_eq!(eval("42").unwrap(), 42);
    }

    #[test]
    fn precedence() {
        assert_eq!(eval("2 + 3 * 4").unwrap(), 14);
    }

    #[test]
    fn left_associativity() {
        assert_eq!(eval("1 + 2 + 3").unwrap(), 6);
    }

    #[test]
    fn parentheses() {
        assert_eq!(eval("(2 + 3) * 4").unwrap(), 20);
    }

    #[test]
    fn nested_parentheses() {
        assert_eq!(eval("((1 + 2) * (3 + 4))").unwrap(), 21);
    }

    // -- syntax errors --

    #[test]
    fn dangling_operator() {
        let errs = eval("1 +").unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(errs[0].message.contains("unexpected"));
    }

    #[test]
    fn unbalanced_paren() {
        assert!(eval("(1 + 2").is_err());
    }

    #[test]
    fn error_reports_line() {
        let errs = eval("1 +\n+ 2").unwrap_err();
        assert_eq!(errs[0].line, 2);
    }

    // -- grammar defects --

    #[test]
    fn ambiguous_grammar_is_rejected() {
        // E → E + E | Num is shift/reduce ambiguous
        let mut b: GrammarBuilder<i64, ()> = GrammarBuilder::new(TERMS, |_| 0);
        let e = b.nonterminal("E");
        b.production(e, vec![Sym::NonTerm(e), Sym::Term(PLUS), Sym::NonTerm(e)], |_, v| {
            Ok(v[0] + v[2])
        });
        b.production(e, vec![Sym::Term(NUM)], |_, mut v| Ok(v.remove(0)));

        let errs = Parser::compile(b.build(e)).err().expect("must conflict");
        assert!(errs
            .iter()
            .any(|e| matches!(e, GrammarError::Conflict { .. })));
    }

    #[test]
    fn unreachable_nonterminal_is_rejected() {
        let mut b: GrammarBuilder<i64, ()> = GrammarBuilder::new(TERMS, |_| 0);
        let e = b.nonterminal("E");
        let orphan = b.nonterminal("Orphan");
        b.production(e, vec![Sym::Term(NUM)], |_, mut v| Ok(v.remove(0)));
        b.production(orphan, vec![Sym::Term(PLUS)], |_, mut v| Ok(v.remove(0)));

        let errs = Parser::compile(b.build(e)).err().expect("must be flagged");
        assert!(errs
            .iter()
            .any(|e| matches!(e, GrammarError::Unreachable { name } if name == "Orphan")));
    }

    #[test]
    fn productionless_nonterminal_is_rejected() {
        let mut b: GrammarBuilder<i64, ()> = GrammarBuilder::new(TERMS, |_| 0);
        let e = b.nonterminal("E");
        let hole = b.nonterminal("Hole");
        b.production(e, vec![Sym::NonTerm(hole)], |_, mut v| Ok(v.remove(0)));

        let errs = Parser::compile(b.build(e)).err().expect("must be flagged");
        assert!(errs
            .iter()
            .any(|e| matches!(e, GrammarError::NoProductions { name } if name == "Hole")));
    }

    #[test]
    fn multiple_defects_reported_together() {
        let mut b: GrammarBuilder<i64, ()> = GrammarBuilder::new(TERMS, |_| 0);
        let e = b.nonterminal("E");
        let hole = b.nonterminal("Hole");
        let orphan = b.nonterminal("Orphan");
        b.production(e, vec![Sym::NonTerm(hole)], |_, mut v| Ok(v.remove(0)));
        b.production(orphan, vec![Sym::Term(NUM)], |_, mut v| Ok(v.remove(0)));

        let errs = Parser::compile(b.build(e)).err().expect("must be flagged");
        assert!(errs.len() >= 2);
    }

    // -- semantic action failures --

    #[test]
    fn action_error_becomes_parse_error() {
        let mut b: GrammarBuilder<i64, ()> = GrammarBuilder::new(TERMS, |_| 0);
        let e = b.nonterminal("E");
        b.production(e, vec![Sym::Term(NUM)], |_, _| {
            Err(crate::error::ActionError::new("rejected by action"))
        });
        let parser = Parser::compile(b.build(e)).unwrap();
        let tokens = scanner().scan("7").unwrap();
        let errs = parser.parse(&tokens, "7", &mut ()).unwrap_err();
        assert!(errs[0].message.contains("rejected by action"));
    }

    // -- context mutation --

    #[test]
    fn actions_mutate_context() {
        let mut b: GrammarBuilder<i64, Vec<i64>> =
            GrammarBuilder::new(TERMS, |tok| tok.text.parse().unwrap_or(0));
        let list = b.nonterminal("List");
        b.production(list, vec![Sym::Term(NUM)], |ctx, mut v| {
            ctx.push(v[0]);
            Ok(v.remove(0))
        });
        b.production(
            list,
            vec![Sym::NonTerm(list), Sym::Term(PLUS), Sym::Term(NUM)],
            |ctx, v| {
                ctx.push(v[2]);
                Ok(v[2])
            },
        );
        let parser = Parser::compile(b.build(list)).unwrap();
        let input = "1 + 2 + 3";
        let tokens = scanner().scan(input).unwrap();
        let mut seen = Vec::new();
        parser.parse(&tokens, input, &mut seen).unwrap();
        assert_eq!(seen, vec![1, 2, 3]);
    }
}
