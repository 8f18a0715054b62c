mod common;

use std::cell::Cell;
use std::rc::Rc;

use common::*;
use moonlift::ast::{FunctionDecl, Stmt};
use moonlift::bytecode::{Instruction, LoadError, OpCode, Prototype};
use moonlift::bytecode::Lua54;
use moonlift::{decompile, decompile_chunk, decompile_with, DecompileError, Error, Options, Plugin};

fn render(p: &Prototype) -> String {
    render_with(p, &Options::default())
}

fn render_with(p: &Prototype, options: &Options) -> String {
    decompile_with(p, options)
        .unwrap()
        .render(&options.emit)
}

fn counting_loop() -> Prototype {
    let mut p = proto(
        &[
            Instruction::abx(OpCode::LoadI, 0, 0),
            abc(OpCode::LtI, 0, 137, 0),
            jmp(3),
            abc(OpCode::AddI, 0, 0, 128),
            abc(OpCode::MmBinI, 0, 128, 6),
            jmp(-5),
            ret0(),
        ],
        vec![],
    );
    p.local_vars = vec![local("i", 1, 7)];
    p
}

fn empty_function() -> Prototype {
    let mut p = proto(&[ret0()], vec![]);
    p.source = None;
    p.upvalues.clear();
    p
}

#[test]
fn test_arithmetic_inlines_into_one_assignment() {
    let mut p = proto(
        &[
            abc(OpCode::Move, 1, 0, 0),
            Instruction::abx(OpCode::LoadK, 2, 0),
            abc(OpCode::Add, 3, 1, 2),
            abc(OpCode::Return, 3, 2, 0),
        ],
        vec![string("x")],
    );
    p.num_params = 1;
    assert_eq!(render(&p), "v3 = P0 + \"x\"\nreturn v3\n");
}

#[test]
fn test_while_loop_is_not_an_if() {
    assert_eq!(
        render(&counting_loop()),
        "local i = 0\nwhile i < 10 do\n  i = i + 1\nend\n"
    );
}

#[test]
fn test_repeat_body_spans_label_to_test() {
    let mut p = proto(
        &[
            Instruction::abx(OpCode::LoadI, 0, 0),
            abc(OpCode::AddI, 0, 0, 128),
            abc(OpCode::MmBinI, 0, 128, 6),
            abc(OpCode::EqI, 0, 132, 0),
            jmp(-4),
            ret0(),
        ],
        vec![],
    );
    p.local_vars = vec![local("n", 1, 6)];
    assert_eq!(
        render(&p),
        "local n = 0\nrepeat\n  n = n + 1\nuntil n == 5\n"
    );
}

#[test]
fn test_generic_for() {
    let mut p = proto(
        &[
            abc(OpCode::GetTabUp, 0, 0, 0),
            abc(OpCode::GetTabUp, 1, 0, 1),
            abc(OpCode::Call, 0, 2, 5),
            Instruction::abx(OpCode::TForPrep, 0, 0),
            abc(OpCode::TForCall, 0, 0, 2),
            Instruction::abx(OpCode::TForLoop, 0, 2),
            ret0(),
        ],
        vec![string("pairs"), string("t")],
    );
    p.local_vars = vec![
        local("(for state)", 3, 6),
        local("(for state)", 3, 6),
        local("(for state)", 3, 6),
        local("(for state)", 3, 6),
        local("k", 4, 5),
        local("v", 4, 5),
    ];
    assert_eq!(render(&p), "for k, v in pairs(t) do\nend\n");
}

#[test]
fn test_elseif() {
    let mut p = proto(
        &[
            abc(OpCode::Test, 0, 0, 0),
            jmp(3),
            abc(OpCode::GetTabUp, 2, 0, 0),
            abc(OpCode::Call, 2, 1, 1),
            jmp(4),
            abc(OpCode::Test, 1, 0, 0),
            jmp(2),
            abc(OpCode::GetTabUp, 2, 0, 1),
            abc(OpCode::Call, 2, 1, 1),
            ret0(),
        ],
        vec![string("f"), string("g")],
    );
    p.num_params = 2;
    p.local_vars = vec![local("a", 0, 10), local("b", 0, 10)];
    assert_eq!(
        render(&p),
        "if a then\n  f()\nelseif b then\n  g()\nend\n"
    );
}

#[test]
fn test_table_constructor_grouping() {
    let mut p = proto(
        &[
            abc(OpCode::NewTable, 0, 1, 2),
            Instruction::abx(OpCode::ExtraArg, 0, 0),
            Instruction::abx(OpCode::LoadI, 1, 1),
            Instruction::abx(OpCode::LoadI, 2, 2),
            abck(OpCode::SetField, 0, 0, 1),
            abc(OpCode::SetList, 0, 2, 0),
            ret0(),
        ],
        vec![string("x"), moonlift::bytecode::constant::Constant::Integer(3)],
    );
    p.local_vars = vec![local("t", 6, 7)];
    assert_eq!(render(&p), "local t = { x = 3, 1, 2 }\n");
}

#[test]
fn test_unknown_opcode_leaves_the_rest_intact() {
    let mut p = proto(
        &[
            Instruction::abx(OpCode::LoadI, 0, 5),
            ret0(),
            abc(OpCode::Return1, 0, 2, 0),
        ],
        vec![],
    );
    p.code[1] = 0x7F;
    p.local_vars = vec![local("x", 1, 3)];
    assert_eq!(
        render(&p),
        "local x = 5\n-- unknown opcode 127\nreturn x\n"
    );
}

#[test]
fn test_unstructured_jump_keeps_its_label() {
    let p = proto(
        &[
            jmp(2),
            abc(OpCode::GetTabUp, 0, 0, 0),
            abc(OpCode::Call, 0, 1, 1),
            ret0(),
        ],
        vec![string("f")],
    );
    assert_eq!(render(&p), "goto L0\nf()\n::L0::\n");
}

#[test]
fn test_labels_option_keeps_every_label() {
    let mut p = proto(
        &[
            abc(OpCode::Test, 0, 0, 0),
            jmp(1),
            abck(OpCode::SetTabUp, 0, 0, 1),
            ret0(),
        ],
        vec![string("y"), moonlift::bytecode::constant::Constant::Integer(1)],
    );
    p.num_params = 1;
    p.local_vars = vec![local("x", 0, 4)];

    assert_eq!(render(&p), "if x then\n  y = 1\nend\n");
    let options = Options {
        labels: true,
        ..Options::default()
    };
    assert_eq!(
        render_with(&p, &options),
        "if x then\n  y = 1\nend\n::L0::\n"
    );
}

#[test]
fn test_decompile_keeps_every_label() {
    let mut p = proto(
        &[
            abc(OpCode::Test, 0, 0, 0),
            jmp(1),
            abck(OpCode::SetTabUp, 0, 0, 1),
            ret0(),
        ],
        vec![string("y"), moonlift::bytecode::constant::Constant::Integer(1)],
    );
    p.num_params = 1;
    p.local_vars = vec![local("x", 0, 4)];

    let decl = decompile(&p, &Lua54).unwrap();
    assert!(matches!(decl.body.stmts.first(), Some(Stmt::If { .. })));
    assert!(decl.body.stmts.contains(&Stmt::Label("L0".into())));
    // The rendering path still prunes it.
    assert_eq!(render(&p), "if x then\n  y = 1\nend\n");
}

#[test]
fn test_large_integer_renders_exactly() {
    let mut p = proto(
        &[
            Instruction::abx(OpCode::LoadK, 0, 0),
            abc(OpCode::Return1, 0, 2, 0),
        ],
        vec![moonlift::bytecode::constant::Constant::Integer(10_000_000_000_000_000)],
    );
    p.local_vars = vec![local("n", 1, 2)];
    assert_eq!(render(&p), "local n = 10000000000000000\nreturn n\n");
}

#[test]
fn test_indent_width() {
    let mut options = Options::default();
    options.emit.indent = 4;
    assert_eq!(
        render_with(&counting_loop(), &options),
        "local i = 0\nwhile i < 10 do\n    i = i + 1\nend\n"
    );
}

#[test]
fn test_named_function_is_not_listed_again() {
    let mut p = proto(
        &[
            Instruction::abx(OpCode::Closure, 0, 0),
            abc(OpCode::SetTabUp, 0, 0, 0),
            ret0(),
        ],
        vec![string("foo")],
    );
    p.protos = vec![empty_function()];

    let decompiled = decompile_with(&p, &Options::default()).unwrap();
    assert!(decompiled.unreferenced.is_empty());
    assert_eq!(
        decompiled.render(&Default::default()),
        "function foo()\nend\n"
    );
}

#[test]
fn test_unreferenced_prototypes_trail_the_chunk() {
    let mut p = proto(&[ret0()], vec![]);
    p.protos = vec![empty_function()];

    let decompiled = decompile_with(&p, &Options::default()).unwrap();
    assert_eq!(decompiled.unreferenced.len(), 1);
    assert_eq!(decompiled.unreferenced[0].path, vec![0]);
    assert_eq!(
        decompiled.render(&Default::default()),
        "\n-- unreferenced function 0\nfunction()\nend\n"
    );

    let options = Options {
        trailing: false,
        ..Options::default()
    };
    assert!(decompile_with(&p, &options).unwrap().unreferenced.is_empty());
}

struct Marker(Rc<Cell<usize>>);

impl Plugin for Marker {
    fn on_ast_process(&self, decl: &mut FunctionDecl) {
        self.0.set(self.0.get() + 1);
        decl.body.stmts.insert(0, Stmt::Comment("processed".into()));
    }
}

#[test]
fn test_plugin_runs_once_per_top_level_function() {
    let mut p = proto(&[ret0()], vec![]);
    p.protos = vec![empty_function()];
    let calls = Rc::new(Cell::new(0));
    let options = Options::default().with_plugin(Marker(calls.clone()));

    let out = render_with(&p, &options);
    assert_eq!(calls.get(), 2);
    assert!(out.starts_with("-- processed\n"));
    assert!(out.contains("function()\n  -- processed\nend\n"));
}

#[test]
fn test_decompile_chunk_bytes() {
    let p = proto(
        &[
            abc(OpCode::GetTabUp, 0, 0, 0),
            Instruction::abx(OpCode::LoadK, 1, 1),
            abc(OpCode::Call, 0, 2, 1),
            abc(OpCode::Return, 0, 1, 1),
        ],
        vec![string("print"), string("hi")],
    );
    let out = decompile_chunk(&dump(&p), &Options::default()).unwrap();
    assert_eq!(out, "print(\"hi\")\n");
}

#[test]
fn test_decompile_chunk_errors() {
    let err = decompile_chunk(b"\x1bLuc", &Options::default()).unwrap_err();
    assert!(matches!(err, Error::Load(LoadError::NotBinaryChunk)));

    let p = proto(&[Instruction::abx(OpCode::LoadK, 0, 5), ret0()], vec![]);
    let err = decompile_chunk(&dump(&p), &Options::default()).unwrap_err();
    assert!(matches!(
        err,
        Error::Decompile(DecompileError::ConstantOutOfRange { pc: 0, index: 5 })
    ));
    assert_eq!(err.to_string(), "constant index 5 out of range at instruction 0");
}
