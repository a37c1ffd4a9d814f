//! x87 assists.

use uopsim_types::ArchReg;

use super::{ext80_from_f64, f64_from_ext80, AssistEnv, AssistFault, AssistId, AssistTable};
use crate::fpmath::PartialRemainder;
use crate::status::RoundingControl;

type AssistResult = Result<(), AssistFault>;

pub(super) fn register(table: &mut AssistTable) {
    table.register(AssistId::X87Fprem, fprem);
    table.register(AssistId::X87Fprem1, fprem1);
    table.register(AssistId::X87Fyl2xp1, fyl2xp1);
    table.register(AssistId::X87Fyl2x, fyl2x);
    table.register(AssistId::X87Fpatan, fpatan);
    table.register(AssistId::X87Fsqrt, fsqrt);
    table.register(AssistId::X87Fsin, fsin);
    table.register(AssistId::X87Fcos, fcos);
    table.register(AssistId::X87F2xm1, f2xm1);
    table.register(AssistId::X87Frndint, frndint);
    table.register(AssistId::X87Fsincos, fsincos);
    table.register(AssistId::X87Fptan, fptan);
    table.register(AssistId::X87Fxtract, fxtract);
    table.register(AssistId::X87Fscale, fscale);
    table.register(AssistId::X87Fxam, fxam);
    table.register(AssistId::X87Fld80, fld80);
    table.register(AssistId::X87Fstp80, fstp80);
}

/// st(0) = f(st(0)); C2 reports an argument out of range, which never
/// happens over doubles.
fn unary(env: &mut AssistEnv<'_>, f: impl FnOnce(f64) -> f64) -> AssistResult {
    let value = f(env.ctx.st(0));
    env.ctx.set_st(0, value);
    let mut sw = env.ctx.fpsw();
    sw.set_c2(false);
    env.ctx.set_fpsw(sw);
    Ok(())
}

/// st(1) = f(st(0), st(1)), then pop.
fn binary_pop(env: &mut AssistEnv<'_>, f: impl FnOnce(f64, f64) -> f64) -> AssistResult {
    let value = f(env.ctx.st(0), env.ctx.st(1));
    env.ctx.set_st(1, value);
    env.ctx.fp_pop();
    Ok(())
}

fn fsin(env: &mut AssistEnv<'_>) -> AssistResult {
    let math = env.math;
    unary(env, |x| math.fsin(x))
}

fn fcos(env: &mut AssistEnv<'_>) -> AssistResult {
    let math = env.math;
    unary(env, |x| math.fcos(x))
}

fn fsqrt(env: &mut AssistEnv<'_>) -> AssistResult {
    let math = env.math;
    unary(env, |x| math.fsqrt(x))
}

fn f2xm1(env: &mut AssistEnv<'_>) -> AssistResult {
    let math = env.math;
    unary(env, |x| math.f2xm1(x))
}

fn frndint(env: &mut AssistEnv<'_>) -> AssistResult {
    let rc = RoundingControl::from_fcw(env.ctx.fpcw);
    unary(env, |x| rc.round(x))
}

fn fscale(env: &mut AssistEnv<'_>) -> AssistResult {
    let math = env.math;
    let scale = env.ctx.st(1);
    unary(env, |x| math.fscale(x, scale))
}

fn fyl2x(env: &mut AssistEnv<'_>) -> AssistResult {
    let math = env.math;
    binary_pop(env, |x, y| math.fyl2x(x, y))
}

fn fyl2xp1(env: &mut AssistEnv<'_>) -> AssistResult {
    let math = env.math;
    binary_pop(env, |x, y| math.fyl2xp1(x, y))
}

fn fpatan(env: &mut AssistEnv<'_>) -> AssistResult {
    let math = env.math;
    binary_pop(env, |x, y| math.fpatan(y, x))
}

/// st(0) = sin, then push cos.
fn fsincos(env: &mut AssistEnv<'_>) -> AssistResult {
    let (sin, cos) = env.math.fsincos(env.ctx.st(0));
    env.ctx.set_st(0, sin);
    env.ctx.fp_push(cos);
    Ok(())
}

/// st(0) = tan, then push 1.0.
fn fptan(env: &mut AssistEnv<'_>) -> AssistResult {
    let tan = env.math.fptan(env.ctx.st(0));
    env.ctx.set_st(0, tan);
    env.ctx.fp_push(1.0);
    Ok(())
}

/// st(0) = exponent, then push the significand.
fn fxtract(env: &mut AssistEnv<'_>) -> AssistResult {
    let (exponent, significand) = env.math.fxtract(env.ctx.st(0));
    env.ctx.set_st(0, exponent);
    env.ctx.fp_push(significand);
    Ok(())
}

fn store_remainder(env: &mut AssistEnv<'_>, r: PartialRemainder) -> AssistResult {
    env.ctx.set_st(0, r.value);
    let mut sw = env.ctx.fpsw();
    sw.set_c2(!r.complete);
    if r.complete {
        sw.set_c0(r.quotient & 4 != 0);
        sw.set_c3(r.quotient & 2 != 0);
        sw.set_c1(r.quotient & 1 != 0);
    }
    env.ctx.set_fpsw(sw);
    Ok(())
}

fn fprem(env: &mut AssistEnv<'_>) -> AssistResult {
    let r = env.math.fprem(env.ctx.st(0), env.ctx.st(1));
    store_remainder(env, r)
}

fn fprem1(env: &mut AssistEnv<'_>) -> AssistResult {
    let r = env.math.fprem1(env.ctx.st(0), env.ctx.st(1));
    store_remainder(env, r)
}

/// Classifies st(0) into C3/C2/C0 with its sign in C1.
fn fxam(env: &mut AssistEnv<'_>) -> AssistResult {
    let x = env.ctx.st(0);
    let (c3, c2, c0) = if !env.ctx.st_valid(0) {
        (true, false, true)
    } else if x.is_nan() {
        (false, false, true)
    } else if x.is_infinite() {
        (false, true, true)
    } else if x == 0.0 {
        (true, false, false)
    } else if x.is_subnormal() {
        (true, true, false)
    } else {
        (false, true, false)
    };
    let mut sw = env.ctx.fpsw();
    sw.set_c3(c3);
    sw.set_c2(c2);
    sw.set_c0(c0);
    sw.set_c1(x.is_sign_negative());
    env.ctx.set_fpsw(sw);
    Ok(())
}

fn fld80(env: &mut AssistEnv<'_>) -> AssistResult {
    let addr = env.ctx.reg(ArchReg::Ar1);
    let mut raw = [0u8; 10];
    env.mem.copy_from_user(&mut raw, addr).check(addr, raw.len())?;
    env.ctx.fp_push(f64_from_ext80(raw));
    Ok(())
}

fn fstp80(env: &mut AssistEnv<'_>) -> AssistResult {
    let addr = env.ctx.reg(ArchReg::Ar1);
    let raw = ext80_from_f64(env.ctx.st(0));
    env.mem.copy_to_user(addr, &raw).check(addr, raw.len())?;
    env.ctx.fp_pop();
    Ok(())
}
