use lingo::bytecode::compile_error::Severity;
use lingo::bytecode::op::{Opcode, decode, decode_int};
use lingo::bytecode::stack_check::check_script;
use lingo::bytecode::{Compilation, Compiler, ScriptBytecode};
use lingo::compile_and_run;
use lingo::runtime::MemoryHost;

// ============================================================
// Helpers
// ============================================================

fn compile(src: &str) -> Compilation {
    Compiler::new().compile(src).expect("no fatal compile error")
}

fn script(src: &str) -> ScriptBytecode {
    compile(src).into_script().expect("no syntax errors")
}

fn output(src: &str) -> Vec<String> {
    let mut host = MemoryHost::new();
    compile_and_run(src, &mut host).expect("script runs");
    host.output
}

/// Offset operand indices of the structured opcodes.
fn offset_operands(op: Opcode) -> &'static [usize] {
    match op {
        Opcode::IfCode => &[0, 1, 2],
        Opcode::RepeatWhile => &[0, 1],
        Opcode::RepeatWith => &[0, 1, 2, 4],
        Opcode::Tell | Opcode::WhenCode | Opcode::Jump => &[0],
        _ => &[],
    }
}

const SAMPLE: &str = "\
global total
property hits

on classify n
  if n > 10 then
    return \"big\"
  else if n > 5 then
    return \"medium\"
  else
    return \"small\"
  end if
end classify

on sum upto
  s = 0
  repeat with i = 1 to upto
    if i mod 2 = 0 then next repeat
    s = s + i
  end repeat
  return s
end

total = 0
repeat while total < 3
  total = total + 1
end repeat
repeat with k = 3 down to 1
  put classify(k * 4)
end repeat
tell total to put 1
when mouseUp then put the mouseH
set the locH of sprite 2 to the locV of sprite 1
put sum(9)
";

// ============================================================
// Properties
// ============================================================

#[test]
fn compiled_scripts_are_stack_balanced() {
    let scripts = [
        SAMPLE,
        "put 1 + 2 * 3",
        "on f\n  f\nend\nf",
        "put item 1 to 2 of \"a,b,c\" & word 1 of \"x y\"",
        "go to frame 3 of movie \"m\"\nplay done\ngo loop",
    ];
    for src in scripts {
        let script = script(src);
        assert!(check_script(&script).is_ok(), "unbalanced: {}", src);
    }
}

#[test]
fn every_offset_lands_inside_the_code_after_its_anchor() {
    let script = script(SAMPLE);
    let len = script.code.len();
    let mut pos = 0;
    let mut structured = 0;
    while pos < len {
        let instr = decode(&script.code, pos).expect("decodable");
        for &i in offset_operands(instr.op) {
            let target = instr.target(i);
            assert!(target > pos && target <= len, "{:?} at {} -> {}", instr.op, pos, target);
            structured += 1;
        }
        pos = instr.next();
    }
    assert_eq!(pos, len);
    assert!(structured > 10);
}

#[test]
fn block_offsets_point_just_past_a_stop() {
    let script = script(SAMPLE);
    let mut pos = 0;
    while pos < script.code.len() {
        let instr = decode(&script.code, pos).expect("decodable");
        if instr.op == Opcode::IfCode {
            // then and else blocks each end in STOP right before the next block
            for i in [1, 2] {
                let before = instr.target(i) - 1;
                assert_eq!(script.code[before], Opcode::Stop as u32, "IF_CODE at {}", pos);
            }
        }
        pos = instr.next();
    }
}

#[test]
fn offsets_are_relative_so_handler_bodies_relocate() {
    let alone = script("on twice a\n  return a * 2\nend");
    let shifted = script("put 1\nput 2\nput 3\non twice a\n  return a * 2\nend");

    let body = |s: &ScriptBytecode| {
        let entry = s.handler("twice").expect("defined").entry as usize;
        let jump = decode(&s.code, entry - 2).expect("skip jump");
        assert_eq!(jump.op, Opcode::Jump);
        s.code[entry..jump.target(0)].to_vec()
    };
    let a = body(&alone);
    assert_eq!(a, body(&shifted));
    assert_ne!(
        alone.handler("twice").map(|h| h.entry),
        shifted.handler("twice").map(|h| h.entry)
    );
}

#[test]
fn forward_calls_resolve_at_run_time() {
    let src = "put greet(\"ann\")\non greet who\n  return \"hi\" && who\nend";
    assert_eq!(output(src), vec!["hi ann"]);
}

#[test]
fn repeat_with_counts_up_and_down() {
    assert_eq!(
        output("repeat with i = 1 to 4\n  put i\nend repeat"),
        vec!["1", "2", "3", "4"]
    );
    assert_eq!(
        output("repeat with i = 4 down to 2\n  put i\nend repeat"),
        vec!["4", "3", "2"]
    );

    let down = script("repeat with i = 4 down to 2\n  put i\nend repeat");
    let instr = decode(&down.code, 0).expect("decodable");
    assert_eq!(instr.op, Opcode::RepeatWith);
    assert_eq!(instr.operands[3], 0xFFFF_FFFF);
    assert_eq!(decode_int(instr.operands[3]), -1);
}

#[test]
fn recompilation_is_idempotent() {
    let mut compiler = Compiler::new();
    let first = compiler.compile(SAMPLE).expect("compiles");
    let second = compiler.compile(SAMPLE).expect("compiles");
    assert_eq!(first, second);
    assert_eq!(first, Compiler::new().compile(SAMPLE).expect("compiles"));
}

#[test]
fn syntax_errors_do_not_stop_compilation() {
    let src = "put (1\nput 2\nif then\n  put 3\nend if\non later\n  put 4\nend\nput )";
    let compilation = compile(src);
    assert!(compilation.had_error);

    let lines: Vec<usize> = compilation.errors().map(|d| d.line).collect();
    assert!(lines.contains(&1), "{:?}", lines);
    assert!(lines.contains(&3), "{:?}", lines);
    assert!(lines.contains(&9), "{:?}", lines);

    // code after the errors was still compiled, and every block still closes
    assert!(compilation.script.handler("later").is_some());
    assert!(check_script(&compilation.script).is_ok());
    assert!(compilation.into_script().is_err());
}

#[test]
fn end_name_mismatch_is_only_a_warning() {
    let compilation = compile("on first\n  put 1\nend second\nfirst");
    assert!(!compilation.had_error);
    let warnings: Vec<_> = compilation.warnings().collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].severity, Severity::Warning);

    let mut host = MemoryHost::new();
    compile_and_run("on first\n  put 1\nend second\nfirst", &mut host).expect("runs");
    assert_eq!(host.output, vec!["1"]);
}

#[test]
fn compiled_scripts_survive_serialization() {
    let original = script(SAMPLE);
    let bytes = original.to_bytes().expect("encodes");
    let decoded = ScriptBytecode::from_bytes(&bytes).expect("decodes");
    assert_eq!(decoded, original);

    let mut host = MemoryHost::new();
    lingo::runtime::Vm::new()
        .run(&decoded, &mut host)
        .expect("runs");
    assert_eq!(host.output, vec!["big", "medium", "small", "1", "25"]);
}
