use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use asmtool::{
  assemble_text_to_bytecode, disassemble_bytecode_to_text, emulate_bytecode, EmulatorState,
  ListingOptions
};

fn main() {
  tracing_subscriber::registry()
    .with(fmt::layer())
    .with(EnvFilter::from_default_env())
    .init();

  #[cfg(feature = "trace_computation")]
  println!("Computation Tracing ENABLED");

  let text = "
    mov r6, 1
    mov r7, 2;  mov r8, 3
    mov r9, 4       # four lanes, one per register
    device_store i32, 0xF, r6_r7_r8_r9, r17_r18, 4, signed
    stop
  ";
  println!("Program:{}", text);

  let bytecode = match assemble_text_to_bytecode(text) {
    Ok(bytecode) => bytecode,
    Err(e) => {
      eprintln!("{}", e);
      std::process::exit(1);
    }
  };

  match disassemble_bytecode_to_text(&bytecode, &ListingOptions { print_offsets: true }) {
    Ok(listing) => println!("Listing:\n{}", listing),
    Err(e) => {
      eprintln!("{}", e);
      std::process::exit(1);
    }
  }

  let mut machine = EmulatorState::new(256);
  match emulate_bytecode(&bytecode, &mut machine) {
    Ok(exit) => println!("Exit: {:?}\n\nMachine State:\n{}", exit, machine),
    Err(e) => {
      eprintln!("{}", e);
      std::process::exit(1);
    }
  }
}
