use criterion::{Criterion, black_box, criterion_group, criterion_main};
use nl_browser_test::{InstructionInterpreter, interpret, is_dropdown_instruction, is_payment_instruction};

const INSTRUCTIONS: &[&str] = &[
    "Select 'HONG KONG' from the Region dropdown.",
    "Set Region dropdown value to HONG KONG",
    "Input 4111111111111111 as the credit card number",
    "Select 39 as the expiry year dropdown",
    "Click the Continue button",
    "Navigate to https://shop.example.com/checkout",
    "Verify that 'Order confirmed' is shown",
    "Enter 'jane@example.com' in the Email field",
];

fn benchmark_interpret(c: &mut Criterion) {
    let interpreter = InstructionInterpreter::new();

    c.bench_function("interpret_mixed_instructions", |b| {
        b.iter(|| {
            for text in INSTRUCTIONS {
                black_box(interpreter.interpret(black_box(text)));
            }
        })
    });

    c.bench_function("interpret_free_fn", |b| {
        b.iter(|| black_box(interpret(black_box("Select 'EASTERN' from the District dropdown"))))
    });

    c.bench_function("classify_dropdown_and_payment", |b| {
        b.iter(|| {
            for text in INSTRUCTIONS {
                black_box(is_dropdown_instruction(black_box(text)));
                black_box(is_payment_instruction(black_box(text)));
            }
        })
    });
}

criterion_group!(benches, benchmark_interpret);
criterion_main!(benches);
