use crate::traits::{AdaptiveStepper, DynamicalSystem, StepFailure};

/// Butcher tableau of an embedded explicit pair.
///
/// `e` holds the weights of the error estimate. When it has one entry more
/// than `b`, the extra weight applies to `f(t + dt, y_next)` (first-same-as-last).
struct Tableau {
    c: &'static [f64],
    a: &'static [&'static [f64]],
    b: &'static [f64],
    e: &'static [f64],
    error_order: usize,
}

const DORMAND_PRINCE: Tableau = Tableau {
    c: &[0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0],
    a: &[
        &[],
        &[1.0 / 5.0],
        &[3.0 / 40.0, 9.0 / 40.0],
        &[44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0],
        &[19372.0 / 6561.0, -25360.0 / 2187.0, 64448.0 / 6561.0, -212.0 / 729.0],
        &[
            9017.0 / 3168.0,
            -355.0 / 33.0,
            46732.0 / 5247.0,
            49.0 / 176.0,
            -5103.0 / 18656.0,
        ],
    ],
    b: &[
        35.0 / 384.0,
        0.0,
        500.0 / 1113.0,
        125.0 / 192.0,
        -2187.0 / 6784.0,
        11.0 / 84.0,
    ],
    e: &[
        71.0 / 57600.0,
        0.0,
        -71.0 / 16695.0,
        71.0 / 1920.0,
        -17253.0 / 339200.0,
        22.0 / 525.0,
        -1.0 / 40.0,
    ],
    error_order: 4,
};

const BOGACKI_SHAMPINE: Tableau = Tableau {
    c: &[0.0, 1.0 / 2.0, 3.0 / 4.0],
    a: &[&[], &[1.0 / 2.0], &[0.0, 3.0 / 4.0]],
    b: &[2.0 / 9.0, 1.0 / 3.0, 4.0 / 9.0],
    e: &[5.0 / 72.0, -1.0 / 12.0, -1.0 / 9.0, 1.0 / 8.0],
    error_order: 2,
};

/// Stage buffers shared by the explicit pairs.
struct Stages {
    k: Vec<Vec<f64>>,
    tmp: Vec<f64>,
}

impl Stages {
    fn new(dim: usize, count: usize) -> Self {
        Self {
            k: vec![vec![0.0; dim]; count],
            tmp: vec![0.0; dim],
        }
    }

    /// Evaluates every stage of `tableau`, writes y + dt * Σ b_i k_i into
    /// `next` and, when the tableau is FSAL, evaluates f at the new point.
    fn run(
        &mut self,
        tableau: &Tableau,
        system: &dyn DynamicalSystem,
        t: f64,
        state: &[f64],
        dt: f64,
        next: &mut [f64],
    ) {
        let dim = state.len();
        system.apply(t, state, &mut self.k[0]);

        for s in 1..tableau.b.len() {
            let row = tableau.a[s];
            for i in 0..dim {
                let mut acc = 0.0;
                for (j, a) in row.iter().enumerate() {
                    acc += a * self.k[j][i];
                }
                self.tmp[i] = state[i] + dt * acc;
            }
            system.apply(t + tableau.c[s] * dt, &self.tmp, &mut self.k[s]);
        }

        for i in 0..dim {
            let mut acc = 0.0;
            for (j, b) in tableau.b.iter().enumerate() {
                acc += b * self.k[j][i];
            }
            next[i] = state[i] + dt * acc;
        }

        if tableau.e.len() > tableau.b.len() {
            let last = tableau.b.len();
            system.apply(t + dt, next, &mut self.k[last]);
        }
    }

    /// error = dt * Σ w_i k_i
    fn combine(&self, weights: &[f64], dt: f64, out: &mut [f64]) {
        for (i, slot) in out.iter_mut().enumerate() {
            let mut acc = 0.0;
            for (j, w) in weights.iter().enumerate() {
                acc += w * self.k[j][i];
            }
            *slot = dt * acc;
        }
    }
}

/// Dormand-Prince 5(4) pair, the general-purpose default.
pub struct Rk45 {
    stages: Stages,
}

impl Rk45 {
    pub fn new(dim: usize) -> Self {
        Self {
            stages: Stages::new(dim, DORMAND_PRINCE.e.len()),
        }
    }
}

impl AdaptiveStepper for Rk45 {
    fn error_order(&self) -> usize {
        DORMAND_PRINCE.error_order
    }

    fn attempt(
        &mut self,
        system: &dyn DynamicalSystem,
        t: f64,
        state: &[f64],
        dt: f64,
        next: &mut [f64],
        error: &mut [f64],
    ) -> Result<(), StepFailure> {
        self.stages.run(&DORMAND_PRINCE, system, t, state, dt, next);
        self.stages.combine(DORMAND_PRINCE.e, dt, error);
        Ok(())
    }
}

/// Bogacki-Shampine 3(2) pair, cheap at loose tolerances.
pub struct Rk23 {
    stages: Stages,
}

impl Rk23 {
    pub fn new(dim: usize) -> Self {
        Self {
            stages: Stages::new(dim, BOGACKI_SHAMPINE.e.len()),
        }
    }
}

impl AdaptiveStepper for Rk23 {
    fn error_order(&self) -> usize {
        BOGACKI_SHAMPINE.error_order
    }

    fn attempt(
        &mut self,
        system: &dyn DynamicalSystem,
        t: f64,
        state: &[f64],
        dt: f64,
        next: &mut [f64],
        error: &mut [f64],
    ) -> Result<(), StepFailure> {
        self.stages.run(&BOGACKI_SHAMPINE, system, t, state, dt, next);
        self.stages.combine(BOGACKI_SHAMPINE.e, dt, error);
        Ok(())
    }
}

const DOP853: Tableau = Tableau {
    c: &[
        0.0,
        0.526001519587677318785587544488e-01,
        0.789002279381515978178381316732e-01,
        0.118350341907227396726757197510,
        0.281649658092772603273242802490,
        0.333333333333333333333333333333,
        0.25,
        0.307692307692307692307692307692,
        0.651282051282051282051282051282,
        0.6,
        0.857142857142857142857142857142,
        1.0,
    ],
    a: &[
        &[],
        &[5.26001519587677318785587544488e-2],
        &[
            1.97250569845378994544595329183e-2,
            5.91751709536136983633785987549e-2,
        ],
        &[
            2.95875854768068491816892993775e-2,
            0.0,
            8.87627564304205475450678981324e-2,
        ],
        &[
            2.41365134159266685502369798665e-1,
            0.0,
            -8.84549479328286085344864962717e-1,
            9.24834003261792003115737966543e-1,
        ],
        &[
            3.7037037037037037037037037037e-2,
            0.0,
            0.0,
            1.70828608729473871279604482173e-1,
            1.25467687566822425016691814123e-1,
        ],
        &[
            3.7109375e-2,
            0.0,
            0.0,
            1.70252211019544039314978060272e-1,
            6.02165389804559606850219397283e-2,
            -1.7578125e-2,
        ],
        &[
            3.70920001185047927108779319836e-2,
            0.0,
            0.0,
            1.70383925712239993810214054705e-1,
            1.07262030446373284651809199168e-1,
            -1.53194377486244017527936158236e-2,
            8.27378916381402288758473766002e-3,
        ],
        &[
            6.24110958716075717114429577812e-1,
            0.0,
            0.0,
            -3.36089262944694129406857109825,
            -8.68219346841726006818189891453e-1,
            2.75920996994467083049415600797e1,
            2.01540675504778934086186788979e1,
            -4.34898841810699588477366255144e1,
        ],
        &[
            4.77662536438264365890433908527e-1,
            0.0,
            0.0,
            -2.48811461997166764192642586468,
            -5.90290826836842996371446475743e-1,
            2.12300514481811942347288949897e1,
            1.52792336328824235832596922938e1,
            -3.32882109689848629194453265587e1,
            -2.03312017085086261358222928593e-2,
        ],
        &[
            -9.3714243008598732571704021658e-1,
            0.0,
            0.0,
            5.18637242884406370830023853209,
            1.09143734899672957818500254654,
            -8.14978701074692612513997267357,
            -1.85200656599969598641566180701e1,
            2.27394870993505042818970056734e1,
            2.49360555267965238987089396762,
            -3.0467644718982195003823669022,
        ],
        &[
            2.27331014751653820792359768449,
            0.0,
            0.0,
            -1.05344954667372501984066689879e1,
            -2.00087205822486249909675718444,
            -1.79589318631187989172765950534e1,
            2.79488845294199600508499808837e1,
            -2.85899827713502369474065508674,
            -8.87285693353062954433549289258,
            1.23605671757943030647266201528e1,
            6.43392746015763530355970484046e-1,
        ],
    ],
    b: &[
        5.42937341165687622380535766363e-2,
        0.0,
        0.0,
        0.0,
        0.0,
        4.45031289275240888144113950566,
        1.89151789931450038304281599044,
        -5.8012039600105847814672114227,
        3.1116436695781989440891606237e-1,
        -1.52160949662516078556178806805e-1,
        2.01365400804030348374776537501e-1,
        4.47106157277725905176885569043e-2,
    ],
    e: &[
        0.1312004499419488073250102996e-1,
        0.0,
        0.0,
        0.0,
        0.0,
        -0.1225156446376204440720569753e+1,
        -0.4957589496572501915214079952,
        0.1664377182454986536961530415e+1,
        -0.3503288487499736816886487290,
        0.3341791187130174790297318841,
        0.8192320648511571246570742613e-1,
        -0.2235530786388629525884427845e-1,
        0.0,
    ],
    error_order: 7,
};

/// b minus the third-order companion weights.
const DOP853_E3: [f64; 13] = [
    5.42937341165687622380535766363e-2 - 0.244094488188976377952755905512,
    0.0,
    0.0,
    0.0,
    0.0,
    4.45031289275240888144113950566,
    1.89151789931450038304281599044,
    -5.8012039600105847814672114227,
    3.1116436695781989440891606237e-1 - 0.733846688281611857341361741547,
    -1.52160949662516078556178806805e-1,
    2.01365400804030348374776537501e-1,
    4.47106157277725905176885569043e-2 - 0.220588235294117647058823529412e-1,
    0.0,
];

/// Dormand-Prince 8(5,3): eighth-order solution, error estimated from a
/// fifth-order estimate damped by a third-order one.
pub struct Dop853 {
    stages: Stages,
    error3: Vec<f64>,
}

impl Dop853 {
    pub fn new(dim: usize) -> Self {
        Self {
            stages: Stages::new(dim, DOP853.e.len()),
            error3: vec![0.0; dim],
        }
    }
}

impl AdaptiveStepper for Dop853 {
    fn error_order(&self) -> usize {
        DOP853.error_order
    }

    fn attempt(
        &mut self,
        system: &dyn DynamicalSystem,
        t: f64,
        state: &[f64],
        dt: f64,
        next: &mut [f64],
        error: &mut [f64],
    ) -> Result<(), StepFailure> {
        self.stages.run(&DOP853, system, t, state, dt, next);
        self.stages.combine(DOP853.e, dt, error);
        self.stages.combine(&DOP853_E3, dt, &mut self.error3);
        Ok(())
    }

    fn error_norm(&self, error: &[f64], scale: &[f64]) -> f64 {
        if error.is_empty() {
            return 0.0;
        }
        let mut err5 = 0.0;
        let mut err3 = 0.0;
        for i in 0..error.len() {
            err5 += (error[i] / scale[i]).powi(2);
            err3 += (self.error3[i] / scale[i]).powi(2);
        }
        if err5 == 0.0 && err3 == 0.0 {
            return 0.0;
        }
        err5 / ((err5 + 0.01 * err3) * error.len() as f64).sqrt()
    }
}
