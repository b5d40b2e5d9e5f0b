//! Bundled user programs

use alloc::format;

use crate::loader::ProgramTable;
use crate::syscall::STDOUT_FILENO;
use crate::trap::Stopped;
use crate::user::Syscalls;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;

/// Register every bundled program.
pub fn install(table: &ProgramTable) {
    table.register("additional", additional);
}

/// `additional a b c d`: prints `fibonacci(a) max_of_four_int(a, b, c, d)`.
pub fn additional(sys: &mut Syscalls<'_>) -> Result<i32, Stopped> {
    let argv = sys.argv()?;
    if argv.len() != 5 {
        sys.write(
            STDOUT_FILENO,
            b"Usage: ./additional [num1] [num2] [num3] [num4]\n",
        )?;
        return Ok(EXIT_FAILURE);
    }

    let a = atoi(&argv[1]);
    let b = atoi(&argv[2]);
    let c = atoi(&argv[3]);
    let d = atoi(&argv[4]);

    let fib = sys.fibonacci(a)?;
    let max = sys.max_of_four_int(a, b, c, d)?;
    sys.write(STDOUT_FILENO, format!("{} {}\n", fib, max).as_bytes())?;

    Ok(EXIT_SUCCESS)
}

/// C `atoi`: leading whitespace, an optional sign, then digits up to the
/// first non-digit. Anything else gives 0. Overflow wraps.
pub fn atoi(s: &str) -> i32 {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let value = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i32, |acc, digit| acc.wrapping_mul(10).wrapping_add(i32::from(digit - b'0')));

    if negative {
        value.wrapping_neg()
    } else {
        value
    }
}
