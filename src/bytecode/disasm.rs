use std::collections::BTreeSet;
use std::fmt::Write;

use crate::bytecode::ir::ScriptBytecode;
use crate::bytecode::op::{Instr, Opcode, VarScope, decode, decode_float, decode_int};
use crate::lang::entity::{TheEntity, TheField};

/// Print disassembly of a compiled script
pub fn print_bc(script: &ScriptBytecode) {
    print!("{}", disassemble(script));
}

/// Return disassembly as a String
pub fn disassemble(script: &ScriptBytecode) -> String {
    let mut out = String::new();
    out.push_str("=== BYTECODE SCRIPT ===\n\n");

    let labels = entry_labels(script);
    let targets = collect_jump_targets(script);

    out.push_str("════════════════════════════════════════\n");
    out.push_str(&format!(
        " {} words, {} literals, {} handlers, {} factories\n",
        script.code.len(),
        script.literals.len(),
        script.handlers.len(),
        script.factories.len()
    ));
    out.push_str("════════════════════════════════════════\n");

    let mut pos = 0;
    while pos < script.code.len() {
        if let Some(label) = labels.iter().find(|(at, _)| *at == pos).map(|(_, l)| l) {
            out.push_str(&format!("\n{}:\n", label));
        }
        if targets.contains(&pos) {
            out.push_str("      ┌──────────────────────────────────\n");
        }
        out.push_str(&format!("{:04} ", pos));
        out.push_str(if targets.contains(&pos) { "► " } else { "  " });

        match decode(&script.code, pos) {
            Ok(instr) => {
                out.push_str(&format_instr(script, &instr));
                out.push('\n');
                pos = instr.next();
            }
            Err(err) => {
                let _ = writeln!(out, "??          {:#010x} ; {}", script.code[pos], err);
                pos += 1;
            }
        }
    }

    if !script.literals.is_empty() {
        out.push_str("\nliterals:\n");
        for (i, lit) in script.literals.iter().enumerate() {
            let _ = writeln!(out, "  [{}] {:?}", i, lit);
        }
    }
    out
}

fn entry_labels(script: &ScriptBytecode) -> Vec<(usize, String)> {
    let mut labels: Vec<(usize, String)> = script
        .handlers
        .values()
        .map(|h| (h.entry as usize, format!("on {}/{}", h.name, h.arity)))
        .collect();
    for factory in script.factories.values() {
        for m in factory.methods.values() {
            labels.push((
                m.entry as usize,
                format!("method {}.{}/{}", factory.name, m.name, m.arity),
            ));
        }
    }
    labels.sort();
    labels
}

fn offset_operands(op: Opcode) -> &'static [usize] {
    match op {
        Opcode::IfCode => &[0, 1, 2],
        Opcode::RepeatWhile => &[0, 1],
        Opcode::RepeatWith => &[0, 1, 2, 4],
        Opcode::Tell | Opcode::WhenCode | Opcode::Jump => &[0],
        _ => &[],
    }
}

fn collect_jump_targets(script: &ScriptBytecode) -> BTreeSet<usize> {
    let mut targets = BTreeSet::new();
    let mut pos = 0;
    while let Ok(instr) = decode(&script.code, pos) {
        for &i in offset_operands(instr.op) {
            targets.insert(instr.target(i));
        }
        pos = instr.next();
    }
    targets
}

fn literal(script: &ScriptBytecode, index: u32) -> String {
    match script.literal(index) {
        Some(text) => format!("{:?}", text),
        None => format!("<bad literal {}>", index),
    }
}

fn entity_operands(instr: &Instr<'_>) -> String {
    let entity = TheEntity::from_word(instr.operands[0]).map_or("?", TheEntity::name);
    let field = TheField::from_word(instr.operands[1]).map_or("?", TheField::name);
    format!("the {} of {}", field, entity)
}

fn jump(instr: &Instr<'_>, index: usize) -> String {
    let offset = decode_int(instr.operands[index]);
    format!("{:+} (→ {:04})", offset, instr.target(index))
}

fn format_instr(script: &ScriptBytecode, instr: &Instr<'_>) -> String {
    let name = instr.op.mnemonic();
    let ops = instr.operands;
    match instr.op {
        Opcode::PushInt => format!("{:<12}{}", name, decode_int(ops[0])),
        Opcode::PushFloat => format!("{:<12}{:?}", name, decode_float(ops[0], ops[1])),
        Opcode::PushSymbol => match script.literal(ops[0]) {
            Some(sym) => format!("{:<12}#{}", name, sym),
            None => format!("{:<12}{}", name, literal(script, ops[0])),
        },
        Opcode::PushString
        | Opcode::PushVar
        | Opcode::PushGlobal
        | Opcode::PushProp
        | Opcode::AssignVar
        | Opcode::AssignGlobal
        | Opcode::AssignProp
        | Opcode::ObjectFieldPush
        | Opcode::ObjectFieldAssign => format!("{:<12}{}", name, literal(script, ops[0])),
        Opcode::PushParam | Opcode::AssignParam => format!("{:<12}slot {}", name, ops[0]),

        Opcode::TheEntityPush
        | Opcode::TheEntityWithIdPush
        | Opcode::TheMenuItemPush
        | Opcode::TheEntityAssign
        | Opcode::TheEntityWithIdAssign
        | Opcode::TheMenuItemAssign => format!("{:<12}; {}", name, entity_operands(instr)),

        Opcode::IfCode => format!(
            "{:<12}then {}, else {}, end {}",
            name,
            jump(instr, 0),
            jump(instr, 1),
            jump(instr, 2)
        ),
        Opcode::RepeatWhile => format!("{:<12}body {}, end {}", name, jump(instr, 0), jump(instr, 1)),
        Opcode::RepeatWith => {
            let var = match VarScope::try_from(ops[5]) {
                Ok(VarScope::Param) => format!("param slot {}", ops[6]),
                Ok(scope) => format!("{:?} {}", scope, literal(script, ops[6])).to_lowercase(),
                Err(word) => format!("<bad scope {}>", word),
            };
            let step = if decode_int(ops[3]) < 0 { "down" } else { "up" };
            format!(
                "{:<12}{} {}; init {}, finish {}, body {}, end {}",
                name,
                var,
                step,
                jump(instr, 0),
                jump(instr, 1),
                jump(instr, 2),
                jump(instr, 4)
            )
        }
        Opcode::Tell | Opcode::Jump => format!("{:<12}{}", name, jump(instr, 0)),
        Opcode::WhenCode => format!(
            "{:<12}{} end {}",
            name,
            literal(script, ops[1]),
            jump(instr, 0)
        ),

        Opcode::Call | Opcode::CallBuiltin => {
            format!("{:<12}{} argc {}", name, literal(script, ops[0]), ops[1])
        }
        Opcode::ObjCall => format!("{:<12}argc {}", name, ops[0]),

        _ => name.to_string(),
    }
}
