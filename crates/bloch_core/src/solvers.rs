use crate::traits::{lit, DynamicalSystem, EmbeddedStepper, Scalar};

/// Dormand-Prince 5(4) Solver
///
/// Seven stages, fifth-order propagation, fourth-order embedded error
/// estimate, and Hairer's fourth-order continuous extension for dense output.
pub struct Dopri5<T: Scalar> {
    k1: Vec<T>,
    k2: Vec<T>,
    k3: Vec<T>,
    k4: Vec<T>,
    k5: Vec<T>,
    k6: Vec<T>,
    k7: Vec<T>,
    tmp: Vec<T>,
}

impl<T: Scalar> Dopri5<T> {
    pub fn new(dim: usize) -> Self {
        let z = T::zero();
        Self {
            k1: vec![z; dim],
            k2: vec![z; dim],
            k3: vec![z; dim],
            k4: vec![z; dim],
            k5: vec![z; dim],
            k6: vec![z; dim],
            k7: vec![z; dim],
            tmp: vec![z; dim],
        }
    }
}

impl<T: Scalar> EmbeddedStepper<T> for Dopri5<T> {
    fn error_order(&self) -> usize {
        4
    }

    fn try_step(
        &mut self,
        system: &impl DynamicalSystem<T>,
        t: T,
        state: &[T],
        dt: T,
        out: &mut [T],
        err: &mut [T],
    ) {
        let c2 = lit::<T>(1.0 / 5.0);
        let c3 = lit::<T>(3.0 / 10.0);
        let c4 = lit::<T>(4.0 / 5.0);
        let c5 = lit::<T>(8.0 / 9.0);

        let a21 = lit::<T>(1.0 / 5.0);

        let a31 = lit::<T>(3.0 / 40.0);
        let a32 = lit::<T>(9.0 / 40.0);

        let a41 = lit::<T>(44.0 / 45.0);
        let a42 = lit::<T>(-56.0 / 15.0);
        let a43 = lit::<T>(32.0 / 9.0);

        let a51 = lit::<T>(19372.0 / 6561.0);
        let a52 = lit::<T>(-25360.0 / 2187.0);
        let a53 = lit::<T>(64448.0 / 6561.0);
        let a54 = lit::<T>(-212.0 / 729.0);

        let a61 = lit::<T>(9017.0 / 3168.0);
        let a62 = lit::<T>(-355.0 / 33.0);
        let a63 = lit::<T>(46732.0 / 5247.0);
        let a64 = lit::<T>(49.0 / 176.0);
        let a65 = lit::<T>(-5103.0 / 18656.0);

        // b coefficients (5th order); b2 = 0
        let b1 = lit::<T>(35.0 / 384.0);
        let b3 = lit::<T>(500.0 / 1113.0);
        let b4 = lit::<T>(125.0 / 192.0);
        let b5 = lit::<T>(-2187.0 / 6784.0);
        let b6 = lit::<T>(11.0 / 84.0);

        // e = b - b_hat
        let e1 = lit::<T>(71.0 / 57600.0);
        let e3 = lit::<T>(-71.0 / 16695.0);
        let e4 = lit::<T>(71.0 / 1920.0);
        let e5 = lit::<T>(-17253.0 / 339200.0);
        let e6 = lit::<T>(22.0 / 525.0);
        let e7 = lit::<T>(-1.0 / 40.0);

        let n = state.len();

        // k1
        system.apply(t, state, &mut self.k1);

        // k2
        for i in 0..n {
            self.tmp[i] = state[i] + dt * (a21 * self.k1[i]);
        }
        system.apply(t + c2 * dt, &self.tmp, &mut self.k2);

        // k3
        for i in 0..n {
            self.tmp[i] = state[i] + dt * (a31 * self.k1[i] + a32 * self.k2[i]);
        }
        system.apply(t + c3 * dt, &self.tmp, &mut self.k3);

        // k4
        for i in 0..n {
            self.tmp[i] = state[i] + dt * (a41 * self.k1[i] + a42 * self.k2[i] + a43 * self.k3[i]);
        }
        system.apply(t + c4 * dt, &self.tmp, &mut self.k4);

        // k5
        for i in 0..n {
            self.tmp[i] = state[i]
                + dt * (a51 * self.k1[i] + a52 * self.k2[i] + a53 * self.k3[i] + a54 * self.k4[i]);
        }
        system.apply(t + c5 * dt, &self.tmp, &mut self.k5);

        // k6
        for i in 0..n {
            self.tmp[i] = state[i]
                + dt * (a61 * self.k1[i]
                    + a62 * self.k2[i]
                    + a63 * self.k3[i]
                    + a64 * self.k4[i]
                    + a65 * self.k5[i]);
        }
        system.apply(t + dt, &self.tmp, &mut self.k6);

        // Propagated solution
        for i in 0..n {
            out[i] = state[i]
                + dt * (b1 * self.k1[i]
                    + b3 * self.k3[i]
                    + b4 * self.k4[i]
                    + b5 * self.k5[i]
                    + b6 * self.k6[i]);
        }

        // k7 at the new point (FSAL stage, needed by the error and the interpolant)
        system.apply(t + dt, out, &mut self.k7);

        for i in 0..n {
            err[i] = dt
                * (e1 * self.k1[i]
                    + e3 * self.k3[i]
                    + e4 * self.k4[i]
                    + e5 * self.k5[i]
                    + e6 * self.k6[i]
                    + e7 * self.k7[i]);
        }
    }

    fn interpolate(&self, theta: T, dt: T, start: &[T], end: &[T], out: &mut [T]) {
        let d1 = lit::<T>(-12715105075.0 / 11282082432.0);
        let d3 = lit::<T>(87487479700.0 / 32700410799.0);
        let d4 = lit::<T>(-10690763975.0 / 1880347072.0);
        let d5 = lit::<T>(701980252875.0 / 199316789632.0);
        let d6 = lit::<T>(-1453857185.0 / 822651844.0);
        let d7 = lit::<T>(69997945.0 / 29380423.0);

        let theta1 = T::one() - theta;

        for i in 0..start.len() {
            let ydiff = end[i] - start[i];
            let bspl = dt * self.k1[i] - ydiff;
            let r4 = ydiff - dt * self.k7[i] - bspl;
            let r5 = dt
                * (d1 * self.k1[i]
                    + d3 * self.k3[i]
                    + d4 * self.k4[i]
                    + d5 * self.k5[i]
                    + d6 * self.k6[i]
                    + d7 * self.k7[i]);
            out[i] = start[i] + theta * (ydiff + theta1 * (bspl + theta * (r4 + theta1 * r5)));
        }
    }
}

/// Tsitouras 5/4 Solver
///
/// Same stage layout as Dormand-Prince but with coefficients tuned for a
/// smaller principal error; carries its own free fourth-order interpolant.
pub struct Tsit5<T: Scalar> {
    k1: Vec<T>,
    k2: Vec<T>,
    k3: Vec<T>,
    k4: Vec<T>,
    k5: Vec<T>,
    k6: Vec<T>,
    k7: Vec<T>,
    tmp: Vec<T>,
}

impl<T: Scalar> Tsit5<T> {
    pub fn new(dim: usize) -> Self {
        let z = T::zero();
        Self {
            k1: vec![z; dim],
            k2: vec![z; dim],
            k3: vec![z; dim],
            k4: vec![z; dim],
            k5: vec![z; dim],
            k6: vec![z; dim],
            k7: vec![z; dim],
            tmp: vec![z; dim],
        }
    }
}

impl<T: Scalar> EmbeddedStepper<T> for Tsit5<T> {
    fn error_order(&self) -> usize {
        4
    }

    fn try_step(
        &mut self,
        system: &impl DynamicalSystem<T>,
        t: T,
        state: &[T],
        dt: T,
        out: &mut [T],
        err: &mut [T],
    ) {
        // Tsit5 Coefficients
        let c2 = lit::<T>(0.161);
        let c3 = lit::<T>(0.327);
        let c4 = lit::<T>(0.9);
        let c5 = lit::<T>(0.9800255409045097);

        let a21 = lit::<T>(0.161);

        let a31 = lit::<T>(-0.008480655492356989);
        let a32 = lit::<T>(0.335480655492357);

        let a41 = lit::<T>(2.897153057105493);
        let a42 = lit::<T>(-6.359448489975075);
        let a43 = lit::<T>(4.3622954328695815);

        let a51 = lit::<T>(5.325864828439257);
        let a52 = lit::<T>(-11.748883564062828);
        let a53 = lit::<T>(7.4955393428898365);
        let a54 = lit::<T>(-0.09249506636175525);

        let a61 = lit::<T>(5.86145544294642);
        let a62 = lit::<T>(-12.92096931784711);
        let a63 = lit::<T>(8.159367898576159);
        let a64 = lit::<T>(-0.071584973281401);
        let a65 = lit::<T>(-0.028269050394068383);

        // b coefficients (5th order)
        let b1 = lit::<T>(0.09646076681806523);
        let b2 = lit::<T>(0.01);
        let b3 = lit::<T>(0.4798896504144996);
        let b4 = lit::<T>(1.379008574103742);
        let b5 = lit::<T>(-3.290069515436081);
        let b6 = lit::<T>(2.324710524099774);

        // Error coefficients (b - b_hat)
        let btilde1 = lit::<T>(-0.00178001105222577714);
        let btilde2 = lit::<T>(-0.0008164344596567469);
        let btilde3 = lit::<T>(0.007880878010261995);
        let btilde4 = lit::<T>(-0.1447110071732629);
        let btilde5 = lit::<T>(0.5823571654525552);
        let btilde6 = lit::<T>(-0.45808210592918697);
        let btilde7 = lit::<T>(0.015151515151515152);

        let n = state.len();

        // k1
        system.apply(t, state, &mut self.k1);

        // k2
        for i in 0..n {
            self.tmp[i] = state[i] + dt * (a21 * self.k1[i]);
        }
        system.apply(t + c2 * dt, &self.tmp, &mut self.k2);

        // k3
        for i in 0..n {
            self.tmp[i] = state[i] + dt * (a31 * self.k1[i] + a32 * self.k2[i]);
        }
        system.apply(t + c3 * dt, &self.tmp, &mut self.k3);

        // k4
        for i in 0..n {
            self.tmp[i] = state[i] + dt * (a41 * self.k1[i] + a42 * self.k2[i] + a43 * self.k3[i]);
        }
        system.apply(t + c4 * dt, &self.tmp, &mut self.k4);

        // k5
        for i in 0..n {
            self.tmp[i] = state[i]
                + dt * (a51 * self.k1[i] + a52 * self.k2[i] + a53 * self.k3[i] + a54 * self.k4[i]);
        }
        system.apply(t + c5 * dt, &self.tmp, &mut self.k5);

        // k6
        for i in 0..n {
            self.tmp[i] = state[i]
                + dt * (a61 * self.k1[i]
                    + a62 * self.k2[i]
                    + a63 * self.k3[i]
                    + a64 * self.k4[i]
                    + a65 * self.k5[i]);
        }
        system.apply(t + dt, &self.tmp, &mut self.k6);

        // Update State
        for i in 0..n {
            out[i] = state[i]
                + dt * (b1 * self.k1[i]
                    + b2 * self.k2[i]
                    + b3 * self.k3[i]
                    + b4 * self.k4[i]
                    + b5 * self.k5[i]
                    + b6 * self.k6[i]);
        }

        // k7 at the new point
        system.apply(t + dt, out, &mut self.k7);

        for i in 0..n {
            err[i] = dt
                * (btilde1 * self.k1[i]
                    + btilde2 * self.k2[i]
                    + btilde3 * self.k3[i]
                    + btilde4 * self.k4[i]
                    + btilde5 * self.k5[i]
                    + btilde6 * self.k6[i]
                    + btilde7 * self.k7[i]);
        }
    }

    fn interpolate(&self, theta: T, dt: T, start: &[T], _end: &[T], out: &mut [T]) {
        let th = theta;
        let th2 = th * th;

        let b1 = lit::<T>(-1.0530884977290216)
            * th
            * (th - lit(1.3299890189751412))
            * (th2 - lit::<T>(1.4364028541716351) * th + lit(0.7139816917074209));
        let b2 = lit::<T>(0.1017)
            * th2
            * (th2 - lit::<T>(2.1966568338249754) * th + lit(1.2949852507374631));
        let b3 = lit::<T>(2.490627285651252793)
            * th2
            * (th2 - lit::<T>(2.38535645472061657) * th + lit(1.57803468208092486));
        let b4 = lit::<T>(-16.54810288924490272)
            * (th - lit(1.21712927295533244))
            * (th - lit(0.61620406037800089))
            * th2;
        let b5 = lit::<T>(47.37952196281928122)
            * (th - lit(1.203071208372362603))
            * (th - lit(0.658047292653547382))
            * th2;
        let b6 = lit::<T>(-34.87065786149660974)
            * (th - lit(1.2))
            * (th - lit(0.666666666666666667))
            * th2;
        let b7 = lit::<T>(2.5) * (th - T::one()) * (th - lit(0.6)) * th2;

        for i in 0..start.len() {
            out[i] = start[i]
                + dt * (b1 * self.k1[i]
                    + b2 * self.k2[i]
                    + b3 * self.k3[i]
                    + b4 * self.k4[i]
                    + b5 * self.k5[i]
                    + b6 * self.k6[i]
                    + b7 * self.k7[i]);
        }
    }
}
