//! The standard definitions every program starts with.

use crate::definition::{Behavior, Color, ControlFlow, Definition, InputSlot};

pub const CONTROL: Color = Color::rgb(0xff, 0x99, 0x00);
pub const OPERATORS: Color = Color::rgb(0x59, 0xc0, 0x59);
pub const DATA: Color = Color::rgb(0xff, 0x8c, 0x1a);
pub const TERMINAL: Color = Color::rgb(0xaa, 0xaa, 0xaa);

pub const ON_START: &str = "on_start";
pub const DEFINE: &str = "define";
pub const REPEAT: &str = "repeat";
pub const REPEAT_UNTIL: &str = "repeat_until";
pub const FOREVER: &str = "forever";
pub const IF: &str = "if";
pub const ELSE: &str = "else";
pub const END: &str = "end";
pub const RETURN: &str = "return";

/// Operators of the `math` block's dropdown.
pub const MATH_OPERATIONS: &[&str] = &["abs", "floor", "ceil", "round", "sqrt"];

fn control(id: &str, slots: Vec<InputSlot>, flow: ControlFlow) -> Definition {
    Definition::new(id, slots, Behavior::control(flow)).in_category("control", CONTROL)
}

fn native(id: &str, slots: Vec<InputSlot>, category: &str, color: Color) -> Definition {
    Definition::new(id, slots, Behavior::native(id)).in_category(category, color)
}

fn binary(id: &str, symbol: &str) -> Definition {
    native(
        id,
        vec![
            InputSlot::argument("a"),
            InputSlot::text(symbol),
            InputSlot::argument("b"),
        ],
        "operators",
        OPERATORS,
    )
}

pub fn definitions() -> Vec<Definition> {
    use InputSlot as S;

    vec![
        control(ON_START, vec![S::text("when run")], ControlFlow::OnStart),
        control(
            DEFINE,
            vec![S::text("define"), S::DefinitionEditor],
            ControlFlow::DefineProcedure,
        ),
        control(
            REPEAT,
            vec![S::text("repeat"), S::argument("times")],
            ControlFlow::Repeat,
        ),
        control(
            REPEAT_UNTIL,
            vec![S::text("repeat until"), S::argument("condition")],
            ControlFlow::RepeatUntil,
        ),
        control(FOREVER, vec![S::text("forever")], ControlFlow::Forever),
        control(
            IF,
            vec![S::text("if"), S::argument("condition"), S::text("then")],
            ControlFlow::If,
        ),
        control(ELSE, vec![S::text("else")], ControlFlow::Else),
        control(END, vec![S::text("end")], ControlFlow::End),
        control(
            RETURN,
            vec![S::text("return"), S::argument("value")],
            ControlFlow::Return,
        ),
        binary("add", "+"),
        binary("sub", "-"),
        binary("mul", "*"),
        binary("div", "/"),
        binary("mod", "mod"),
        binary("eq", "="),
        binary("lt", "<"),
        binary("gt", ">"),
        binary("and", "and"),
        binary("or", "or"),
        native(
            "not",
            vec![S::text("not"), S::argument("value")],
            "operators",
            OPERATORS,
        ),
        native(
            "join",
            vec![S::text("join"), S::argument("a"), S::argument("b")],
            "operators",
            OPERATORS,
        ),
        native(
            "length",
            vec![S::text("length of"), S::argument("text")],
            "operators",
            OPERATORS,
        ),
        native(
            "math",
            vec![
                S::dropdown("operation", MATH_OPERATIONS),
                S::text("of"),
                S::argument("value"),
            ],
            "operators",
            OPERATORS,
        ),
        native(
            "declare_var",
            vec![
                S::text("local"),
                S::argument("name"),
                S::text("="),
                S::argument("value"),
            ],
            "data",
            DATA,
        ),
        native(
            "set_var",
            vec![
                S::text("set"),
                S::argument("name"),
                S::text("="),
                S::argument("value"),
            ],
            "data",
            DATA,
        ),
        native(
            "change_var",
            vec![
                S::text("change"),
                S::argument("name"),
                S::text("by"),
                S::argument("delta"),
            ],
            "data",
            DATA,
        ),
        native("get_var", vec![S::argument("name")], "data", DATA),
        native(
            "print",
            vec![S::text("print"), S::argument("value")],
            "terminal",
            TERMINAL,
        ),
        native(
            "wait",
            vec![S::text("wait"), S::argument("seconds"), S::text("s")],
            "control",
            CONTROL,
        ),
    ]
}
