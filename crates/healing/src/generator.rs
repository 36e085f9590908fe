//! Adversarial scenario generation (§4.11 paragraph 2): corpus mutation,
//! trojan-pasting, and DoS-template sampling, in the whitelisted IR's own
//! terms. There is no loop/call/recursion node (§3.2), so the DoS template
//! here is the one resource-exhaustion shape the IR *can* express: pathological
//! expression-tree depth approaching `NODE_LIMIT`.

use rand::Rng;
use veritas_core::ir::{BinOp, CmpOp, Expr};
use veritas_core::ir::Intent;

/// One candidate scenario handed to the pipeline, tagged with the
/// generation strategy that produced it (used as the learned rule's
/// `attack_type` if the scenario reaches L3 unblocked).
pub struct Scenario {
    pub attack_type: String,
    pub intent: Intent,
}

/// Seed corpus of known exploit shapes the mutator perturbs. Each is a
/// minimal intent whose post-condition breaks an invariant the defense
/// pipeline is meant to catch.
fn seed_corpus() -> Vec<(&'static str, Intent)> {
    vec![
        ("money_printer", money_printer_intent(100)),
        ("unchecked_decrement", unchecked_decrement_intent(50)),
        ("phantom_mint", phantom_mint_intent(25)),
    ]
}

fn money_printer_intent(amount: i128) -> Intent {
    let mut intent = Intent::new("transfer");
    intent.constraints.push(Expr::Compare {
        op: CmpOp::Ge,
        lhs: Box::new(Expr::Identifier("old_sender_balance".into())),
        rhs: Box::new(Expr::IntLiteral(amount)),
    });
    // Post-condition never debits the sender: classic conservation violation.
    intent.post_conditions.push(Expr::Compare {
        op: CmpOp::Eq,
        lhs: Box::new(Expr::Identifier("receiver_balance".into())),
        rhs: Box::new(Expr::Binary {
            op: BinOp::Add,
            lhs: Box::new(Expr::Identifier("old_receiver_balance".into())),
            rhs: Box::new(Expr::IntLiteral(amount)),
        }),
    });
    intent
}

fn unchecked_decrement_intent(amount: i128) -> Intent {
    let mut intent = Intent::new("withdraw");
    // No guard establishing old_balance >= amount: an unsigned underflow shape.
    intent.post_conditions.push(Expr::Compare {
        op: CmpOp::Eq,
        lhs: Box::new(Expr::Identifier("balance".into())),
        rhs: Box::new(Expr::Binary {
            op: BinOp::Sub,
            lhs: Box::new(Expr::Identifier("old_balance".into())),
            rhs: Box::new(Expr::IntLiteral(amount)),
        }),
    });
    intent
}

fn phantom_mint_intent(amount: i128) -> Intent {
    let mut intent = Intent::new("mint");
    intent.post_conditions.push(Expr::Compare {
        op: CmpOp::Eq,
        lhs: Box::new(Expr::Identifier("total_supply".into())),
        rhs: Box::new(Expr::Binary {
            op: BinOp::Add,
            lhs: Box::new(Expr::Identifier("old_total_supply".into())),
            rhs: Box::new(Expr::IntLiteral(amount)),
        }),
    });
    intent
}

/// Mutates a seed exploit's literal amount and identifier suffix so repeated
/// generations aren't byte-identical to the seed (strategy (a)).
fn mutate(rng: &mut impl Rng, attack_type: &'static str, mut intent: Intent) -> Scenario {
    let new_amount = rng.gen_range(1..10_000);
    let suffix = rng.gen_range(0..1000);
    rename_and_rescale(&mut intent, new_amount, suffix);
    Scenario { attack_type: attack_type.to_string(), intent }
}

fn rename_and_rescale(intent: &mut Intent, new_amount: i128, suffix: u32) {
    for expr in intent.constraints.iter_mut().chain(intent.post_conditions.iter_mut()) {
        rescale_literals(expr, new_amount);
    }
    intent.name = format!("{}_{suffix}", intent.name);
}

fn rescale_literals(expr: &mut Expr, new_amount: i128) {
    match expr {
        Expr::IntLiteral(v) => *v = new_amount,
        Expr::Unary { expr, .. } | Expr::Paren(expr) => rescale_literals(expr, new_amount),
        Expr::Binary { lhs, rhs, .. } | Expr::Compare { lhs, rhs, .. } => {
            rescale_literals(lhs, new_amount);
            rescale_literals(rhs, new_amount);
        }
        Expr::DecimalLiteral { .. } | Expr::Identifier(_) => {}
    }
}

/// Pastes a malicious sub-tree (a money-printer post-condition) underneath a
/// legitimate-looking transfer skeleton — strategy (b).
fn trojan(rng: &mut impl Rng) -> Scenario {
    let amount = rng.gen_range(1..10_000);
    let mut intent = Intent::new("transfer");
    intent.constraints.push(Expr::Compare {
        op: CmpOp::Ge,
        lhs: Box::new(Expr::Identifier("old_sender_balance".into())),
        rhs: Box::new(Expr::IntLiteral(amount)),
    });
    intent.post_conditions.push(Expr::Compare {
        op: CmpOp::Eq,
        lhs: Box::new(Expr::Identifier("sender_balance".into())),
        rhs: Box::new(Expr::Binary {
            op: BinOp::Sub,
            lhs: Box::new(Expr::Identifier("old_sender_balance".into())),
            rhs: Box::new(Expr::IntLiteral(amount)),
        }),
    });
    // Malicious sub-tree: credits the receiver twice the debited amount.
    intent.post_conditions.push(Expr::Compare {
        op: CmpOp::Eq,
        lhs: Box::new(Expr::Identifier("receiver_balance".into())),
        rhs: Box::new(Expr::Binary {
            op: BinOp::Add,
            lhs: Box::new(Expr::Identifier("old_receiver_balance".into())),
            rhs: Box::new(Expr::Binary {
                op: BinOp::Mul,
                lhs: Box::new(Expr::IntLiteral(2)),
                rhs: Box::new(Expr::IntLiteral(amount)),
            }),
        }),
    });
    Scenario { attack_type: "trojan_double_credit".to_string(), intent }
}

/// Deeply nested `((((1 + 1) + 1) + 1)...)` expression approaching
/// `node_limit`, approximating a resource-exhaustion attempt in an IR with
/// no loop construct — strategy (c).
fn dos_template(depth: usize) -> Scenario {
    let mut expr = Expr::IntLiteral(1);
    for _ in 0..depth {
        expr = Expr::Paren(Box::new(Expr::Binary {
            op: BinOp::Add,
            lhs: Box::new(expr),
            rhs: Box::new(Expr::IntLiteral(1)),
        }));
    }
    let mut intent = Intent::new("deep_nest");
    intent.post_conditions.push(Expr::Compare {
        op: CmpOp::Eq,
        lhs: Box::new(Expr::Identifier("result".into())),
        rhs: expr,
    });
    Scenario { attack_type: "dos_deep_nesting".to_string(), intent }
}

/// Generates `n` candidate scenarios, cycling through all three strategies
/// (§4.11: "(a) mutating a seeded corpus ... (b) synthesizing trojans ...
/// (c) sampling denial-of-service templates").
pub fn generate(rng: &mut impl Rng, n: usize) -> Vec<Scenario> {
    let corpus = seed_corpus();
    (0..n)
        .map(|i| match i % 3 {
            0 => {
                let (attack_type, intent) = &corpus[i / 3 % corpus.len()];
                mutate(rng, attack_type, intent.clone())
            }
            1 => trojan(rng),
            _ => dos_template(50 + (i % 20) * 10),
        })
        .collect()
}
